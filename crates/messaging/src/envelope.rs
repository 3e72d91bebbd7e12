//! Message envelopes: payload plus immutable identity and causal metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use message_store::{CorrelationId, MessageId};
use serde::{Deserialize, Serialize};

use crate::context::MessageContext;
use crate::error::{MessagingError, Result};
use crate::message::{DomainEvent, Message};
use crate::validation::{ValidationError, ValidationErrors};

/// Reserved header carrying the payload's registered type name.
pub const MESSAGE_TYPE_HEADER: &str = "message-type";

/// How far in the future an overridden `created_at` may lie (clock skew).
const CREATED_AT_TOLERANCE_SECS: i64 = 5;

/// Identity and causal lineage of one envelope.
///
/// Fields are read-only; building a different envelope is the only way to
/// change them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    message_id: MessageId,
    correlation_id: CorrelationId,
    causation_id: Option<MessageId>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

impl EnvelopeMetadata {
    fn fresh(message_type: &str, ctx: &MessageContext) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(MESSAGE_TYPE_HEADER.to_string(), message_type.to_string());
        Self {
            message_id: MessageId::new(),
            correlation_id: ctx.correlation_id(),
            causation_id: ctx.causation_id(),
            created_at: Utc::now(),
            headers,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn causation_id(&self) -> Option<MessageId> {
        self.causation_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// The payload's registered type name.
    pub fn message_type(&self) -> Option<&str> {
        self.header(MESSAGE_TYPE_HEADER)
    }
}

/// A typed payload wrapped with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    message: M,
    metadata: EnvelopeMetadata,
}

impl<M: Message> Envelope<M> {
    /// Wraps a payload with a fresh message id, inheriting the context's chain.
    pub fn wrap(message: M, ctx: &MessageContext) -> Self {
        Self {
            message,
            metadata: EnvelopeMetadata::fresh(M::MESSAGE_TYPE, ctx),
        }
    }

    /// Starts an envelope with metadata overrides.
    pub fn builder(message: M, ctx: &MessageContext) -> EnvelopeBuilder<M> {
        EnvelopeBuilder::new(message, M::MESSAGE_TYPE, ctx)
    }
}

impl<E: DomainEvent> Envelope<E> {
    /// Wraps a domain event, typed by its variant's event type.
    pub fn wrap_event(event: E, ctx: &MessageContext) -> Self {
        let metadata = EnvelopeMetadata::fresh(event.event_type(), ctx);
        Self {
            message: event,
            metadata,
        }
    }
}

impl<M> Envelope<M> {
    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn metadata(&self) -> &EnvelopeMetadata {
        &self.metadata
    }

    pub fn into_message(self) -> M {
        self.message
    }

    pub fn into_parts(self) -> (M, EnvelopeMetadata) {
        (self.message, self.metadata)
    }

    /// Starts a new envelope for the same payload, seeded with this one's metadata.
    pub fn rewrap(self) -> EnvelopeBuilder<M> {
        let message_type = self.metadata.message_type().unwrap_or_default().to_string();
        let mut headers = self.metadata.headers;
        headers.remove(MESSAGE_TYPE_HEADER);

        EnvelopeBuilder {
            message: self.message,
            message_type,
            message_id: Some(self.metadata.message_id),
            correlation_id: self.metadata.correlation_id,
            causation_id: self.metadata.causation_id,
            created_at: Some(self.metadata.created_at),
            headers,
        }
    }
}

impl<M: Serialize> Envelope<M> {
    /// Erases the payload type for storage or transport.
    pub fn to_raw(&self) -> Result<RawEnvelope> {
        Ok(RawEnvelope {
            message: serde_json::to_value(&self.message)?,
            metadata: self.metadata.clone(),
        })
    }
}

/// Builder for envelopes with metadata overrides.
///
/// `build` checks every rule and reports all violations at once.
#[derive(Debug)]
pub struct EnvelopeBuilder<M> {
    message: M,
    message_type: String,
    message_id: Option<MessageId>,
    correlation_id: CorrelationId,
    causation_id: Option<MessageId>,
    created_at: Option<DateTime<Utc>>,
    headers: BTreeMap<String, String>,
}

impl<M> EnvelopeBuilder<M> {
    fn new(message: M, message_type: &str, ctx: &MessageContext) -> Self {
        Self {
            message,
            message_type: message_type.to_string(),
            message_id: None,
            correlation_id: ctx.correlation_id(),
            causation_id: ctx.causation_id(),
            created_at: None,
            headers: BTreeMap::new(),
        }
    }

    /// Sets the message ID. If not set, a new ID will be generated.
    pub fn message_id(mut self, id: MessageId) -> Self {
        self.message_id = Some(id);
        self
    }

    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn causation_id(mut self, id: MessageId) -> Self {
        self.causation_id = Some(id);
        self
    }

    /// Marks the envelope as the root of its chain.
    pub fn no_causation(mut self) -> Self {
        self.causation_id = None;
        self
    }

    /// Sets the creation time. If not set, the current time will be used.
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Builds the envelope, or lists every rule the overrides violate.
    pub fn build(self) -> std::result::Result<Envelope<M>, ValidationErrors> {
        let now = Utc::now();
        let message_id = self.message_id.unwrap_or_default();
        let created_at = self.created_at.unwrap_or(now);
        let mut errors = ValidationErrors::new();

        for key in self.headers.keys() {
            if key.trim().is_empty() {
                errors.push(ValidationError::BlankHeaderKey);
            } else if key.eq_ignore_ascii_case(MESSAGE_TYPE_HEADER) {
                errors.push(ValidationError::ReservedHeader(key.clone()));
            }
        }
        if self.correlation_id.as_uuid().is_nil() {
            errors.push(ValidationError::BlankCorrelationId);
        }
        if self.causation_id == Some(message_id) {
            errors.push(ValidationError::SelfCausation(message_id));
        }
        if created_at > now + Duration::seconds(CREATED_AT_TOLERANCE_SECS) {
            errors.push(ValidationError::CreatedInFuture { created_at, now });
        }

        let mut headers = self.headers;
        headers.insert(MESSAGE_TYPE_HEADER.to_string(), self.message_type);

        errors.into_result(Envelope {
            message: self.message,
            metadata: EnvelopeMetadata {
                message_id,
                correlation_id: self.correlation_id,
                causation_id: self.causation_id,
                created_at,
                headers,
            },
        })
    }
}

/// A type-erased envelope, as stored and as sent over the wire.
///
/// ```json
/// {"message": {...}, "metadata": {"messageId": "...", "correlationId": "...",
///  "causationId": null, "createdAt": "...", "headers": {"message-type": "..."}}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    message: serde_json::Value,
    metadata: EnvelopeMetadata,
}

impl RawEnvelope {
    /// Parses the wire form; anything that is not an envelope is malformed.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| MessagingError::MalformedPayload(format!("not an envelope: {e}")))
    }

    /// Parses the wire form from bytes received off a transport.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| MessagingError::MalformedPayload(format!("not an envelope: {e}")))
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn message(&self) -> &serde_json::Value {
        &self.message
    }

    pub fn metadata(&self) -> &EnvelopeMetadata {
        &self.metadata
    }

    pub fn message_type(&self) -> Option<&str> {
        self.metadata.message_type()
    }

    /// Recovers the typed envelope.
    ///
    /// Fails with `TypeMismatch` if the envelope carries another payload type,
    /// and with `MalformedPayload` if the payload does not decode as `M`.
    pub fn unwrap<M: Message>(&self) -> Result<Envelope<M>> {
        let actual = self.message_type().unwrap_or("<none>");
        if actual != M::MESSAGE_TYPE {
            return Err(MessagingError::TypeMismatch {
                expected: M::MESSAGE_TYPE.to_string(),
                actual: actual.to_string(),
            });
        }

        let message: M = serde_json::from_value(self.message.clone())
            .map_err(|e| MessagingError::MalformedPayload(format!("{actual}: {e}")))?;

        Ok(Envelope {
            message,
            metadata: self.metadata.clone(),
        })
    }
}
