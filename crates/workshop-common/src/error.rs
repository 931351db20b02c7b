//! Error types for the workshop operator
//!
//! Errors carry the resource kind and name they relate to so a failed pass
//! can be traced back to the exact object in the store. Store failures are
//! classified first as [`StoreError`]; only the benign classes (already
//! exists, not found) are interpreted by callers, everything else is lifted
//! into [`Error::Store`] and aborts the current reconciliation pass.

use thiserror::Error;

use crate::resource::ResourceKind;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Classified failure returned by a [`crate::store::ResourceStore`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Create found an object with the same identity
    #[error("already exists")]
    AlreadyExists,

    /// Get or delete found no such object
    #[error("not found")]
    NotFound,

    /// Update lost a write race against another writer
    #[error("conflict: {0}")]
    Conflict(String),

    /// Anything else (transport, authorization, validation by the API server)
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Short machine-readable reason for logs and error fields
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::AlreadyExists => "AlreadyExists",
            StoreError::NotFound => "NotFound",
            StoreError::Conflict(_) => "Conflict",
            StoreError::Other(_) => "Other",
        }
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound,
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                StoreError::AlreadyExists
            }
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message),
            other => StoreError::Other(other.to_string()),
        }
    }
}

/// Main error type for workshop operations
#[derive(Debug, Error)]
pub enum Error {
    /// Hard store failure; aborts the current pass
    #[error("store error [{reason}] on {kind} {name}: {message}")]
    Store {
        /// Kind of the object the operation targeted
        kind: ResourceKind,
        /// Name of the object the operation targeted
        name: String,
        /// Classified reason (see [`StoreError::reason`])
        reason: &'static str,
        /// Underlying message
        message: String,
    },

    /// Invalid Workshop spec
    #[error("validation error for {workshop}: {message}")]
    Validation {
        /// Name of the Workshop with invalid configuration
        workshop: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.users.count")
        field: Option<String>,
    },

    /// Credential hashing failure
    #[error("credential error for {subject}: {message}")]
    Credential {
        /// Tenant or account the credential belongs to
        subject: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<ResourceKind>,
    },

    /// Staging file could not be written or read
    #[error("staging error at {path}: {message}")]
    Staging {
        /// Path of the staging file
        path: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "controller", "finalizer")
        context: String,
    },
}

impl Error {
    /// Lift a classified store failure into a hard error for the given object
    pub fn store(kind: ResourceKind, name: impl Into<String>, err: StoreError) -> Self {
        let message = err.to_string();
        Self::Store {
            kind,
            name: name.into(),
            reason: err.reason(),
            message,
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            workshop: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with workshop context and field path
    pub fn validation_for_field(
        workshop: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            workshop: workshop.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a credential error
    pub fn credential(subject: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Credential {
            subject: subject.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: ResourceKind, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind),
        }
    }

    /// Create a staging error
    pub fn staging(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Staging {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec or code change.
    /// Store errors are retried by the scheduler on its own backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store { .. } => true,
            Error::Validation { .. } => false,
            Error::Credential { .. } => false,
            Error::Serialization { .. } => false,
            Error::Staging { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the store reason if this is a store error
    pub fn store_reason(&self) -> Option<&'static str> {
        match self {
            Error::Store { reason, .. } => Some(reason),
            _ => None,
        }
    }
}
