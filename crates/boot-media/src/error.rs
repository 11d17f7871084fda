//! Boot media errors

use thiserror::Error;

/// Errors raised while downloading and assembling boot media
#[derive(Debug, Error)]
pub enum MediaError {
    /// The BootMedia field combination does not select a valid flow
    #[error("invalid boot media spec: {0}")]
    InvalidSpec(String),

    /// Transient transport failures exhausted the retry budget
    #[error("download of {url} failed after {attempts} attempts: {message}")]
    Transport {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The server answered with a non-retryable status
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// Downloaded bytes do not match the declared digest; never retried
    #[error("checksum mismatch for {field}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    /// The declared digest is not 64 lowercase hex characters
    #[error("invalid expected digest {0:?}: must be 64 lowercase hex characters")]
    InvalidDigest(String),

    /// ISO image parsing or extraction failure
    #[error(transparent)]
    Iso(#[from] IsoError),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction failure
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The owning object was deleted while downloads were in flight
    #[error("download cancelled")]
    Cancelled,
}

/// Errors raised by the minimal ISO9660 reader
#[derive(Debug, Error)]
pub enum IsoError {
    /// Missing or malformed volume descriptors
    #[error("not an ISO9660 image: {0}")]
    NotIso(&'static str),

    /// The requested path does not exist in the image
    #[error("path {0:?} not found in ISO image")]
    NotFound(String),

    /// Filesystem error while reading the image
    #[error("I/O error reading ISO: {0}")]
    Io(#[from] std::io::Error),
}
