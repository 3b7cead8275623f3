//! Bridge configuration.
//!
//! `BridgeConfig` is read from a JSON document. Every field is optional; the
//! extension identity fields default to the shipped extension's manifest
//! values, so an empty document is a valid configuration.
//!
//! The identity fields are part of the wire contract: two contexts only accept
//! each other's envelopes when both name and version match.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messaging::envelope::MAX_MESSAGE_BYTES;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_EXTENSION_NAME: &str = "Accessibility Insights for Web";

pub const DEFAULT_EXTENSION_VERSION: &str = "2.0.0";

pub const DEFAULT_CLICK_DEBOUNCE_MS: u64 = 10;

pub const DEFAULT_HOVER_DEBOUNCE_MS: u64 = 50;

/// Upper bound for either debounce delay.
pub const MAX_DEBOUNCE_MS: u64 = 10_000;

pub const MIN_MESSAGE_BYTES: usize = 1024;

pub const MAX_CONFIGURABLE_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

// ============================================================================
// BridgeConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Manifest name; the envelope source id is derived from it.
    pub extension_name: String,

    /// Manifest version, stamped on every envelope.
    pub extension_version: String,

    pub click_debounce_ms: u64,

    pub hover_debounce_ms: u64,

    /// Serialized envelopes longer than this are dropped unparsed.
    pub max_message_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            extension_name: DEFAULT_EXTENSION_NAME.to_string(),
            extension_version: DEFAULT_EXTENSION_VERSION.to_string(),
            click_debounce_ms: DEFAULT_CLICK_DEBOUNCE_MS,
            hover_debounce_ms: DEFAULT_HOVER_DEBOUNCE_MS,
            max_message_bytes: MAX_MESSAGE_BYTES,
        }
    }
}

impl BridgeConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded bridge config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extension_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "extension_name",
                reason: "must not be empty",
            });
        }
        if self.extension_version.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "extension_version",
                reason: "must not be empty",
            });
        }
        if self.click_debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::InvalidValue {
                field: "click_debounce_ms",
                reason: "must be <= 10000",
            });
        }
        if self.hover_debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::InvalidValue {
                field: "hover_debounce_ms",
                reason: "must be <= 10000",
            });
        }
        if !(MIN_MESSAGE_BYTES..=MAX_CONFIGURABLE_MESSAGE_BYTES).contains(&self.max_message_bytes) {
            return Err(ConfigError::InvalidValue {
                field: "max_message_bytes",
                reason: "must be between 1 KiB and 16 MiB",
            });
        }
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bridge config: {field} {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },

    #[error("failed to parse bridge config: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("failed to read bridge config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
