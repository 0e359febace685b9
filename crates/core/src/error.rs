//! Crate-wide error type.

use crate::{Category, ContentKey};

/// Result alias that carries the custom [`StreamError`] type.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Common error type for the core crate.
///
/// Only [`StreamError::Config`], [`StreamError::Io`] and [`StreamError::Json`]
/// are meant to reach start-up code. Everything else is produced and
/// recovered inside the pipeline; the frame loop logs it and carries on.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Invalid configuration detected at start-up.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// No voice of the requested category is free right now.
    #[error("no available `{category}` voice for layering")]
    ResourceExhausted { category: Category },
    /// The worker could not build a content unit.
    #[error("failed to build content at {key}: {reason}")]
    Build { key: ContentKey, reason: String },
    /// An emitter or emission that is no longer live was referenced.
    #[error("stale reference to {0}")]
    StaleReference(String),
    /// A shared structure was poisoned by a panicking thread.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl StreamError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn build<T: Into<String>>(key: ContentKey, reason: T) -> Self {
        Self::Build {
            key,
            reason: reason.into(),
        }
    }
}
