use thiserror::Error;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, Error)]
pub enum KubernetesError {
    #[error("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[error("Failed to watch {resource}: {message}")]
    WatchFailed {
        resource: &'static str,
        message: String,
    },
    #[error("Failed to parse quantity: {message}")]
    QuantityParseError { message: String },
}
