//! Accessor errors

use resource_store::{ObjectKind, StoreError};
use thiserror::Error;

/// Errors surfaced by the accessor service
#[derive(Debug, Error)]
pub enum AccessorError {
    /// Underlying store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The addressed object does not exist
    #[error("{kind} {name:?} not found")]
    NotFound { kind: ObjectKind, name: String },

    /// The BootMedia exists but has not finished downloading; artifact
    /// identity is only exposed for Complete media
    #[error("boot media {0:?} is not complete")]
    NotReady(String),

    /// A ConfigMap exists but does not carry the requested key
    #[error("key {key:?} not found in ConfigMap {name:?}")]
    KeyNotFound { name: String, key: String },
}

impl AccessorError {
    /// Whether this error should surface as an HTTP 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotReady(_) | Self::KeyNotFound { .. })
    }
}
