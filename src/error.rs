//! Unified error handling for the maru crate
//!
//! Domain errors stay in their modules ([`MessageError`], [`DirectoryError`],
//! [`TransportError`], [`ConfigError`]); this module consolidates them into a
//! single [`Error`] for callers that cross module boundaries, such as the
//! binary and the coordinator constructor.

use std::io;

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::directory::DirectoryError;
pub use crate::message::MessageError;
pub use crate::transport::TransportError;

/// Unified error enum wrapping all domain-specific errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience result type using the unified [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
