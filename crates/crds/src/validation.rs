//! Identity validators shared by the controllers and the boot API.
//!
//! Validation is strict: values are accepted or rejected as-is, never
//! normalized. A machineId with uppercase hex is an error, not a fixup.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static MACHINE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[0-9a-f]{32}$").expect("static machine-id regex"));

static MAC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^([0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2}$").expect("static mac regex"));

/// Validation failures for machine identity fields
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// machineId must be exactly 32 lowercase hex characters
    #[error("invalid machineId {0:?}: must be exactly 32 lowercase hex characters")]
    MachineId(String),

    /// MAC address must be six colon-separated hex octets
    #[error("invalid macAddress {0:?}: must be six colon-separated hex octets")]
    MacAddress(String),
}

/// Validates a systemd-style machine id: exactly 32 lowercase hex characters.
///
/// Uppercase input is rejected, not lowercased.
pub fn validate_machine_id(value: &str) -> Result<(), ValidationError> {
    if MACHINE_ID_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::MachineId(value.to_string()))
    }
}

/// Validates a MAC address of the form `aa:bb:cc:dd:ee:ff`.
pub fn validate_mac_address(value: &str) -> Result<(), ValidationError> {
    if MAC_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::MacAddress(value.to_string()))
    }
}

/// Case-insensitive MAC comparison for lookup boundaries.
///
/// Stored MACs are lowercase; boot requests may arrive uppercase.
pub fn mac_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
