//! Error types for the WebConsole operator

use thiserror::Error;

use crate::controller::ResourceKind;

/// Main error type for operator operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Capability detection failed: {0}")]
    Capability(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Certificate error [{kind}]: {message}")]
    Certificate { kind: ResourceKind, message: String },

    #[error("Synthesis error [{kind}]: {message}")]
    Synthesis { kind: ResourceKind, message: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Build a certificate-material error for a secret-backed kind
    pub fn certificate(kind: ResourceKind, message: impl Into<String>) -> Self {
        Error::Certificate {
            kind,
            message: message.into(),
        }
    }

    /// Build a synthesis error attributed to a resource kind
    pub fn synthesis(kind: ResourceKind, message: impl Into<String>) -> Self {
        Error::Synthesis {
            kind,
            message: message.into(),
        }
    }

    /// Whether the error is worth a fast retry
    ///
    /// Transient cluster errors and certificate failures (the CA secret may
    /// simply not be readable yet) are retried quickly; spec problems wait
    /// for the author to edit the record.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(e) => !matches!(e, kube::Error::Api(ae) if ae.code == 400 || ae.code == 422),
            Error::Timeout(_) | Error::Certificate { .. } => true,
            Error::Capability(_)
            | Error::ConfigError(_)
            | Error::ValidationError(_)
            | Error::Synthesis { .. }
            | Error::SerializationError(_) => false,
        }
    }

    /// True when the API server answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(ae)) if ae.code == 404)
    }

    /// True when a create raced another writer
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(ae)) if ae.code == 409 && ae.reason == "AlreadyExists")
    }
}
