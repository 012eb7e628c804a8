//! Controller-specific error types.
//!
//! `ControllerError` covers process-level failures (connection, cache sync,
//! configuration). `ReconcileError` covers a single reconciliation of one
//! Secret and always names the key and the step that failed.

use kube::Error as KubeError;
use pfx_converter::ConvertError;
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Errors that can occur in the PFX TLS Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Connection profile could not be resolved
    #[error("Error building kubeconfig: {0}")]
    KubeConfig(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Informer cache never became ready
    #[error("Failed to wait for caches to sync: {0}")]
    CacheSync(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

/// Work queue key that is not `name` or `namespace/name`.
#[derive(Debug, Error)]
#[error("invalid resource key: {0}")]
pub struct InvalidKey(pub String);

/// Errors returned by a [`crate::store::SecretStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("secret {namespace}/{name} not found")]
    NotFound {
        /// Namespace of the missing object
        namespace: String,
        /// Name of the missing object
        name: String,
    },

    /// Optimistic concurrency check failed
    #[error("conflict: {0}")]
    Conflict(String),

    /// Call did not finish in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// Configured limit
        after: Duration,
    },

    /// Shutdown was requested while the call was in flight
    #[error("cancelled by shutdown")]
    Cancelled,

    /// Any other API failure
    #[error("Kubernetes error")]
    Kube(#[from] KubeError),
}

/// How a failed reconciliation should be read by an operator.
///
/// Both kinds are requeued with backoff; the distinction only affects logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, timeout, conflict or cancellation; expected to clear by itself
    Transient,
    /// The Secret's content is unusable; needs operator intervention
    Data,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Data => f.write_str("data"),
        }
    }
}

/// Failure of one reconciliation attempt.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Cache lookup failed for a reason other than not-found
    #[error("failed to look up secret '{key}'")]
    Lookup {
        /// Work queue key
        key: String,
        /// Underlying store error
        #[source]
        source: StoreError,
    },

    /// Bundle bytes are not present under the configured data key
    #[error("PFX data not found in secret '{key}' at key '{data_key}'")]
    MissingBundleData {
        /// Work queue key
        key: String,
        /// Data key that was looked up
        data_key: String,
    },

    /// Password secret could not be read
    #[error("failed to get password secret '{secret}' for '{key}'")]
    PasswordSecret {
        /// Work queue key
        key: String,
        /// Name of the referenced Secret
        secret: String,
        /// Underlying store error
        #[source]
        source: StoreError,
    },

    /// Password secret exists but lacks the referenced key
    #[error("password key '{data_key}' not found in secret '{secret}' for '{key}'")]
    MissingPasswordKey {
        /// Work queue key
        key: String,
        /// Name of the referenced Secret
        secret: String,
        /// Data key that was looked up
        data_key: String,
    },

    /// Password bytes are not valid UTF-8
    #[error("password in secret '{secret}' key '{data_key}' for '{key}' is not valid UTF-8")]
    InvalidPassword {
        /// Work queue key
        key: String,
        /// Name of the referenced Secret
        secret: String,
        /// Data key holding the password
        data_key: String,
    },

    /// Bundle could not be converted
    #[error("failed to convert PFX to PEM for '{key}'")]
    Conversion {
        /// Work queue key
        key: String,
        /// Underlying converter error
        #[source]
        source: ConvertError,
    },

    /// Updated Secret could not be written
    #[error("failed to update secret '{key}'")]
    Persist {
        /// Work queue key
        key: String,
        /// Underlying store error
        #[source]
        source: StoreError,
    },

    /// Reconciliation panicked; the worker survived and the key is requeued
    #[error("reconciliation of '{key}' panicked: {message}")]
    Panicked {
        /// Work queue key
        key: String,
        /// Panic payload, when it was a string
        message: String,
    },
}

impl ReconcileError {
    /// Classify this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Lookup { .. } | Self::PasswordSecret { .. } | Self::Persist { .. } => {
                ErrorKind::Transient
            }
            Self::MissingBundleData { .. }
            | Self::MissingPasswordKey { .. }
            | Self::InvalidPassword { .. }
            | Self::Conversion { .. }
            | Self::Panicked { .. } => ErrorKind::Data,
        }
    }
}

/// Render an error and its full `source()` chain on one line.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Process-wide error sink.
///
/// Logs the error with its cause chain and returns; never panics.
pub fn report_error(err: &(dyn StdError + 'static)) {
    error!(error = %error_chain(err), "Unhandled error");
}
