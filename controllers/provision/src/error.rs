//! Controller errors.
//!
//! Most failures are captured into status objects rather than raised; this
//! type covers the remainder (store access, startup configuration), which
//! the dispatch loop retries per key.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Resource store failure; the key is requeued with a delay
    #[error("store error: {0}")]
    Store(#[from] resource_store::StoreError),

    /// Boot media machinery failed to initialize
    #[error("boot media error: {0}")]
    Media(#[from] boot_media::MediaError),

    /// Bad startup configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
