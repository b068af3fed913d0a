//! Error types for the Carrier admission webhook

use thiserror::Error;

use crate::validation::FieldErrors;

/// Main error type for admission decisions
///
/// Every variant except [`Error::Config`] is scoped to a single admission
/// request and ends up as a rejecting decision for that request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed envelope or object payload
    #[error("{0}")]
    Decode(String),

    /// Structured field-level validation failures
    #[error("{0}")]
    Validation(FieldErrors),

    /// Service account / role binding lookup or create failed
    #[error("provisioning {resource} in namespace {namespace} failed: {message}")]
    Provisioning {
        /// Kind and name of the object being provisioned (e.g. "serviceaccount/carrier-sdk")
        resource: String,
        /// Namespace the object lives in (empty for cluster-scoped objects)
        namespace: String,
        /// Description of the underlying failure
        message: String,
    },

    /// Patch computation failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid process configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a decode error with the given message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a provisioning error for a resource in a namespace
    pub fn provisioning(
        resource: impl Into<String>,
        namespace: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provisioning {
            resource: resource.into(),
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Field errors carried by a validation failure, if any
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::Validation(errs) => Some(errs),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<FieldErrors> for Error {
    fn from(errs: FieldErrors) -> Self {
        Self::Validation(errs)
    }
}
