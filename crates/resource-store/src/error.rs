//! Resource store errors

use crate::event::ObjectKind;
use thiserror::Error;

/// Errors that can occur when reading or writing the resource store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object addressed by a status update does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: ObjectKind,
        namespace: String,
        name: String,
    },

    /// A conditional write carried a stale resource version; the caller must
    /// re-read and retry
    #[error("conflict updating {kind} {namespace}/{name}: stale resource version")]
    Conflict {
        kind: ObjectKind,
        namespace: String,
        name: String,
    },

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the error is a version conflict (retryable by re-reading).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
