//! Crate-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::messaging::{FrameError, HandlerError, SubscriberError};
use crate::tabs::{InterpretError, RegistryError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("message handler: {0}")]
    Handler(#[from] HandlerError),

    #[error("frame request: {0}")]
    Frame(#[from] FrameError),

    #[error("subscriber failed: {0}")]
    Subscriber(#[from] SubscriberError),

    #[error("interpreter: {0}")]
    Interpret(#[from] InterpretError),

    #[error("tab registry: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("payload encoding: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
