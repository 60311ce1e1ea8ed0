//! Layered error types, one enum per component, composed with `#[from]` the way
//! `K8sError` composes into `GarbageCollectorK8sError`.

use thiserror::Error;

/// Errors from the Kubernetes-facing layer (API-Bridge, normalizer, release store).
#[derive(Debug, Error)]
pub enum K8sError {
    #[error("kube client error: {0}")]
    Kube(#[from] kube::Error),

    #[error("could not resolve REST mapping for {0}")]
    Discovery(String),

    #[error("object is missing .metadata.name")]
    MissingName,

    #[error("object is missing group/version/kind")]
    MissingGvk,

    #[error("failed to serialize object: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to (de)serialize inventory: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("retriable: {reason} (retry after {retry_after_ms}ms)")]
    Retriable { reason: String, retry_after_ms: u64 },
}

/// The five error kinds surfaced to Apply/Delete callers.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("ownership conflict on {0}: live object is owned by another component")]
    OwnershipConflict(String),

    #[error("corrupt state: {0}")]
    CorruptState(String),

    #[error("retriable error on {object}: {reason} (retry after {retry_after_ms}ms)")]
    Retriable {
        object: String,
        reason: String,
        retry_after_ms: u64,
    },

    #[error("transient cluster error: {0}")]
    Transient(K8sError),
}

impl ReconcileError {
    /// Terminal errors require the caller to remedy the cause before retrying;
    /// `Retriable`/`Transient` allow the driver's backoff loop to continue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconcileError::Validation(_)
                | ReconcileError::OwnershipConflict(_)
                | ReconcileError::CorruptState(_)
        )
    }

    /// Lifts a [`K8sError`] into the right variant: a bridge call the API-Bridge's retry
    /// table already classified as retriable surfaces as `Retriable` (carrying the wait
    /// hint) instead of the generic `Transient`, so a driver loop can tell "back off a
    /// little" from "back off a lot". `object` is a human-readable identity for the
    /// affected object, used only in the error message.
    pub fn from_k8s(e: K8sError, object: impl Into<String>) -> Self {
        match e {
            K8sError::Retriable { reason, retry_after_ms } => ReconcileError::Retriable {
                object: object.into(),
                reason,
                retry_after_ms,
            },
            other => ReconcileError::Transient(other),
        }
    }
}

impl From<K8sError> for ReconcileError {
    fn from(e: K8sError) -> Self {
        ReconcileError::from_k8s(e, String::new())
    }
}
