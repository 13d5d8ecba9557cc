//! Runtime error types.

use chatmirror_core::{EndpointId, StartupError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that end the process before or during relay startup.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An endpoint could not be constructed from its settings.
    #[error("Failed to build endpoint {endpoint} ({backend}): {reason}")]
    Endpoint {
        endpoint: EndpointId,
        backend: &'static str,
        reason: String,
    },

    /// The relay failed to start.
    #[error(transparent)]
    Startup(#[from] StartupError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
