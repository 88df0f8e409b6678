//! Error types for the BGP neighbor sync controller

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed startup configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Login to the device failed
    #[error("Authentication with device failed: {0}")]
    AuthError(String),

    /// Transport-level HTTP failure
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Device answered with a non-2xx status
    #[error("HTTP request to {url} failed with status {status}")]
    StatusError { status: u16, url: String },

    /// Device rejected the session signature
    #[error("Session rejected by device for {url}")]
    Unauthorized { url: String },

    /// Every attempt of a device call failed
    #[error("HTTP request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// A device operation failed for a specific neighbor
    #[error("{operation} for neighbor {address} failed: {source}")]
    DeviceError {
        operation: &'static str,
        address: String,
        #[source]
        source: Box<Error>,
    },

    /// Unparseable JSON from the device
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Node watch stream failure
    #[error("Node watch error: {0}")]
    WatchError(String),
}

impl Error {
    /// Wrap an error with the device operation and neighbor it was issued for
    pub fn device(operation: &'static str, address: impl Into<String>, source: Error) -> Self {
        Error::DeviceError {
            operation,
            address: address.into(),
            source: Box::new(source),
        }
    }

    /// Whether the underlying failure was a rejected session
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Error::Unauthorized { .. } => true,
            Error::RetriesExhausted { source, .. } | Error::DeviceError { source, .. } => {
                source.is_unauthorized()
            }
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
