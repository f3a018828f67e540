//! Error types for the localinfer control plane.

use std::error::Error as StdError;
use std::fmt;
use std::result;

/// A specialized Result type for localinfer operations.
pub type Result<T> = result::Result<T, Error>;

/// The error type for localinfer operations.
#[derive(Debug)]
pub enum Error {
    /// Invalid configuration (concurrency limit, unknown backend, ...)
    Config(String),
    /// Model file missing or unreadable, runner binary absent
    ResourceUnavailable(String),
    /// Runner failed while producing a generation
    Generation(String),
    /// Telemetry or backend probe failure
    Probe(String),
    /// I/O errors
    Io(std::io::Error),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Internal errors
    Internal(String),
}

impl Error {
    /// Whether the error is confined to a single request.
    pub fn is_request_local(&self) -> bool {
        matches!(self, Error::Generation(_) | Error::ResourceUnavailable(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::ResourceUnavailable(msg) => write!(f, "Resource unavailable: {}", msg),
            Error::Generation(msg) => write!(f, "Generation error: {}", msg),
            Error::Probe(msg) => write!(f, "Probe error: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::Config("concurrency limit must be between 1 and 8".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: concurrency limit must be between 1 and 8"
        );

        let err = Error::Generation("runner exited".into());
        assert_eq!(err.to_string(), "Generation error: runner exited");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let converted: Error = io_err.into();
        assert!(matches!(converted, Error::Io(_)));
        assert!(converted.source().is_some());

        let config_err = config::ConfigError::NotFound("dispatcher.concurrency_limit".into());
        let converted: Error = config_err.into();
        assert!(matches!(converted, Error::Config(_)));
    }

    #[test]
    fn test_request_local_classification() {
        assert!(Error::Generation("x".into()).is_request_local());
        assert!(Error::ResourceUnavailable("x".into()).is_request_local());
        assert!(!Error::Probe("x".into()).is_request_local());
        assert!(!Error::Config("x".into()).is_request_local());
    }
}
