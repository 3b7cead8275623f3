//! Window message envelope and its marshaller.
//!
//! Every unit crossing a window boundary is a single JSON document carrying a
//! correlation id, the logical command, an optional payload or error, and the
//! three identity fields a receiver uses to reject traffic that is not ours.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::BridgeConfig;

/// Partner teams filter window traffic on this exact value. It must not vary
/// between versions or brandings of the extension.
pub const MESSAGE_STABLE_SIGNATURE: &str = "e467510c-ca1f-47df-ace1-a39f7f0678c9";

/// Upper bound on a serialized envelope accepted by [`Marshaller::parse_message`].
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Marshalled form of a subscriber failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContent {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorContent {
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Captures an error and its `source()` chain. The chain is rendered one
    /// cause per line into `stack`.
    #[must_use]
    pub fn from_error(name: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            name: name.into(),
            message: err.to_string(),
            stack: (!causes.is_empty()).then(|| causes.join("\n")),
        }
    }
}

impl fmt::Display for ErrorContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub message_id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorContent>,
    #[serde(rename = "messageStableSignature")]
    pub stable_signature: String,
    #[serde(rename = "messageSourceId")]
    pub source_id: String,
    #[serde(rename = "messageVersion")]
    pub version: String,
}

type IdGenerator = Box<dyn Fn() -> String>;

/// Builds envelopes stamped with this extension's identity and parses inbound
/// ones, rejecting anything that does not carry the same identity.
pub struct Marshaller {
    source_id: String,
    version: String,
    max_message_bytes: usize,
    generate_id: IdGenerator,
}

impl fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marshaller")
            .field("source_id", &self.source_id)
            .field("version", &self.version)
            .field("max_message_bytes", &self.max_message_bytes)
            .finish_non_exhaustive()
    }
}

impl Marshaller {
    #[must_use]
    pub fn new(extension_name: &str, extension_version: impl Into<String>) -> Self {
        Self {
            source_id: extension_name.to_string(),
            version: extension_version.into(),
            max_message_bytes: MAX_MESSAGE_BYTES,
            generate_id: Box::new(|| Uuid::new_v4().to_string()),
        }
    }

    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(&config.extension_name, config.extension_version.clone())
            .with_max_message_bytes(config.max_message_bytes)
    }

    /// Replaces the UUID generator used when callers do not supply an id.
    #[must_use]
    pub fn with_id_generator(mut self, generate_id: impl Fn() -> String + 'static) -> Self {
        self.generate_id = Box::new(generate_id);
        self
    }

    #[must_use]
    pub const fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn next_message_id(&self) -> String {
        (self.generate_id)()
    }

    /// Builds a payload-carrying envelope. A JSON `null` payload is stored as
    /// "no payload" so that the envelope survives a serialize/parse cycle.
    #[must_use]
    pub fn create_message(
        &self,
        command: &str,
        payload: Option<Value>,
        message_id: Option<String>,
    ) -> MessageEnvelope {
        MessageEnvelope {
            message_id: message_id.unwrap_or_else(|| self.next_message_id()),
            command: command.to_string(),
            message: payload.filter(|value| !value.is_null()),
            error: None,
            stable_signature: MESSAGE_STABLE_SIGNATURE.to_string(),
            source_id: self.source_id.clone(),
            version: self.version.clone(),
        }
    }

    #[must_use]
    pub fn create_error_message(
        &self,
        command: &str,
        error: ErrorContent,
        message_id: Option<String>,
    ) -> MessageEnvelope {
        MessageEnvelope {
            error: Some(error),
            ..self.create_message(command, None, message_id)
        }
    }

    /// Serializes one envelope into one wire unit.
    #[must_use]
    pub fn serialize(&self, envelope: &MessageEnvelope) -> String {
        // Struct of strings and `Value`s; serde_json cannot fail on it.
        serde_json::to_string(envelope).unwrap_or_default()
    }

    /// Parses a raw wire unit. Returns `None` for anything that is not one of
    /// our envelopes: oversized input, non-JSON, non-objects, missing or
    /// mistyped fields, or a foreign signature, source id, or version.
    #[must_use]
    pub fn parse_message(&self, raw: &str) -> Option<MessageEnvelope> {
        if raw.len() > self.max_message_bytes {
            tracing::trace!(bytes = raw.len(), "dropping oversized window message");
            return None;
        }
        let value = serde_json::from_str::<Value>(raw).ok()?;
        self.parse_value(&value)
    }

    #[must_use]
    pub fn parse_value(&self, value: &Value) -> Option<MessageEnvelope> {
        if !value.is_object() {
            return None;
        }
        let envelope = MessageEnvelope::deserialize(value).ok()?;
        let recognized = envelope.stable_signature == MESSAGE_STABLE_SIGNATURE
            && envelope.source_id == self.source_id
            && envelope.version == self.version;
        recognized.then_some(envelope)
    }
}
