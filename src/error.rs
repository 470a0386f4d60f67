//! Error types for docker-dns.

use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Container runtime error
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration could not be loaded or deserialized
    #[error("Failed to load configuration: {0}")]
    Settings(#[from] config::ConfigError),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),
}

/// Failures reported by the container runtime boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The container disappeared between listing and inspection.
    #[error("container not found: {0}")]
    NotFound(String),

    /// The runtime could not be reached or answered with an error.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NotFound(message),
            other => RuntimeError::Unavailable(other.to_string()),
        }
    }
}
