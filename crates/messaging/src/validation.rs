//! Structured envelope validation results.

use chrono::{DateTime, Utc};
use message_store::MessageId;
use thiserror::Error;

/// One violated envelope construction rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("header key must not be blank")]
    BlankHeaderKey,

    #[error("header '{0}' is reserved")]
    ReservedHeader(String),

    #[error("correlation id must not be nil")]
    BlankCorrelationId,

    #[error("message {0} cannot be its own cause")]
    SelfCausation(MessageId),

    #[error("created_at {created_at} is in the future (now {now})")]
    CreatedInFuture {
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },
}

/// Every rule an envelope violated, in the order they were checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, error: &ValidationError) -> bool {
        self.0.contains(error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// Returns `Ok(value)` if nothing was violated.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_errors_pass_through() {
        assert_eq!(ValidationErrors::new().into_result(7), Ok(7));
    }

    #[test]
    fn display_lists_every_violation() {
        let mut errors = ValidationErrors::new();
        errors.push(ValidationError::BlankHeaderKey);
        errors.push(ValidationError::ReservedHeader("message-type".to_string()));

        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.to_string(),
            "header key must not be blank; header 'message-type' is reserved"
        );
        assert!(errors.into_result(()).is_err());
    }
}
