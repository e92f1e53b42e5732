//! Error types for connection stages.

use thiserror::Error;

/// Errors that abort a request or close invocation.
#[derive(Debug, Error)]
pub enum Error {
    /// The chain tail (the peer beyond the last stage) failed.
    #[error("downstream failed: {0}")]
    Downstream(String),

    /// A mechanism parameter is missing or malformed.
    #[error("invalid mechanism parameter {key}={value:?}: {reason}")]
    InvalidMechanismParameter {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// The dataplane agent rejected the configuration.
    #[error("error sending config to dataplane agent ({operation}): {source}; config: {config}")]
    Commit {
        operation: &'static str,
        config: String,
        #[source]
        source: tonic::Status,
    },

    /// Could not set up the channel to the dataplane agent.
    #[error("agent transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Configuration file could not be loaded.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn invalid_param(
        key: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidMechanismParameter {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for connection stages.
pub type Result<T> = std::result::Result<T, Error>;
