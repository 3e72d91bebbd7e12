use message_store::{CorrelationId, MessageId};

use crate::envelope::EnvelopeMetadata;

/// The causal position of the code that is about to create messages.
///
/// Passed explicitly into every call that wraps or stages messages. A root
/// context starts a new correlation chain; a context derived from an envelope
/// continues that envelope's chain and names it as the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageContext {
    correlation_id: CorrelationId,
    causation_id: Option<MessageId>,
}

impl MessageContext {
    /// Starts a new causal chain.
    pub fn root() -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            causation_id: None,
        }
    }

    /// Starts at the root of an existing correlation, e.g. one received from a caller.
    pub fn with_correlation(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            causation_id: None,
        }
    }

    /// Context for messages created while handling the envelope with `metadata`.
    pub fn caused_by(metadata: &EnvelopeMetadata) -> Self {
        Self {
            correlation_id: metadata.correlation_id(),
            causation_id: Some(metadata.message_id()),
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn causation_id(&self) -> Option<MessageId> {
        self.causation_id
    }

    pub fn is_root(&self) -> bool {
        self.causation_id.is_none()
    }
}
