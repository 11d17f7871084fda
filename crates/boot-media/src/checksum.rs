//! SHA-256 verification of downloaded artifacts.
//!
//! Digests are lowercase hex throughout. The verifier never mutates its
//! inputs; a malformed expected digest is rejected rather than silently
//! failing the comparison.

use crate::error::MediaError;
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Streams a file through SHA-256 and returns the lowercase hex digest.
pub async fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of an in-memory buffer, lowercase hex.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Whether a string is a well-formed lowercase hex SHA-256 digest.
pub fn is_valid_digest(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Compares a computed digest against the declared one.
pub fn verify_digest(field: &str, expected: &str, actual: &str) -> Result<(), MediaError> {
    if !is_valid_digest(expected) {
        return Err(MediaError::InvalidDigest(expected.to_string()));
    }
    if expected == actual {
        Ok(())
    } else {
        Err(MediaError::ChecksumMismatch {
            field: field.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
