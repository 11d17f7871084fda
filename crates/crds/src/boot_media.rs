//! BootMedia CRD
//!
//! A set of downloadable boot artifacts (kernel/initrd/ISO/firmware) plus
//! per-field download status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tracked field name: the kernel image.
pub const FIELD_KERNEL: &str = "kernel";
/// Tracked field name: the initrd (flat or no-firmware, depending on flow).
pub const FIELD_INITRD: &str = "initrd";
/// Tracked field name: the ISO image (temporary artifact).
pub const FIELD_ISO: &str = "iso";
/// Tracked field name: the firmware payload (temporary artifact).
pub const FIELD_FIRMWARE: &str = "firmware";
/// Tracked field name: the concatenated with-firmware initrd.
pub const FIELD_FIRMWARE_INITRD: &str = "firmwareInitrd";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bootforge.io",
    version = "v1alpha1",
    kind = "BootMedia",
    namespaced,
    status = "BootMediaStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BootMediaSpec {
    /// Kernel image URL (direct flows)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_url: Option<String>,

    /// Initrd image URL (direct flows)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initrd_url: Option<String>,

    /// ISO image URL (ISO flows)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_url: Option<String>,

    /// Path of the kernel inside the ISO (e.g. "/casper/vmlinuz")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_kernel_path: Option<String>,

    /// Path of the initrd inside the ISO
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_initrd_path: Option<String>,

    /// Firmware payload URL; its presence selects the with-firmware flows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_url: Option<String>,

    /// Expected SHA-256 digests per field (lowercase hex)
    #[serde(default)]
    pub checksums: MediaChecksums,
}

/// Expected SHA-256 digests, lowercase hex. For ISO flows the kernel/initrd
/// digests apply to the extracted bytes, not the ISO itself.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaChecksums {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initrd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
}

/// Overall download phase, derived from the per-field states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum MediaPhase {
    /// No download attempted yet
    #[default]
    Pending,

    /// At least one declared field is still in flight
    Downloading,

    /// Every declared field is Complete
    Complete,

    /// At least one declared field failed and is not retryable
    Failed,
}

/// Download state of one tracked field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum FieldState {
    /// Queued, not yet started
    #[default]
    Pending,

    /// Transfer in progress
    Downloading,

    /// Verified and placed at its final path
    Complete,

    /// Download or verification failed; see error
    Failed,
}

/// Progress of one tracked field.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldProgress {
    /// Current state
    #[serde(default)]
    pub state: FieldState,

    /// Bytes transferred (or produced, for extraction/concatenation fields)
    #[serde(default)]
    pub bytes_transferred: u64,

    /// Total bytes if the source advertised a length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,

    /// Error message when Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootMediaStatus {
    /// Overall phase: Complete iff every declared field is Complete
    #[serde(default)]
    pub phase: MediaPhase,

    /// Per-field download progress, keyed by field name
    #[serde(default)]
    pub fields: BTreeMap<String, FieldProgress>,

    /// Spec generation this status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable detail, set on classification failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MediaPhase {
    /// Derive the overall phase from per-field states.
    ///
    /// Complete iff every field is Complete; Failed as soon as any field is
    /// Failed; Pending only while nothing has started.
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = &'a FieldProgress>) -> Self {
        let mut all_complete = true;
        let mut any_started = false;
        for field in fields {
            match field.state {
                FieldState::Failed => return Self::Failed,
                FieldState::Complete => any_started = true,
                FieldState::Downloading => {
                    any_started = true;
                    all_complete = false;
                }
                FieldState::Pending => all_complete = false,
            }
        }
        if all_complete && any_started {
            Self::Complete
        } else if any_started {
            Self::Downloading
        } else {
            Self::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(state: FieldState) -> FieldProgress {
        FieldProgress {
            state,
            ..FieldProgress::default()
        }
    }

    #[test]
    fn phase_complete_only_when_every_field_complete() {
        let fields = vec![progress(FieldState::Complete), progress(FieldState::Complete)];
        assert_eq!(MediaPhase::from_fields(&fields), MediaPhase::Complete);

        let fields = vec![progress(FieldState::Complete), progress(FieldState::Downloading)];
        assert_eq!(MediaPhase::from_fields(&fields), MediaPhase::Downloading);
    }

    #[test]
    fn phase_failed_wins_over_progress() {
        let fields = vec![
            progress(FieldState::Complete),
            progress(FieldState::Failed),
            progress(FieldState::Downloading),
        ];
        assert_eq!(MediaPhase::from_fields(&fields), MediaPhase::Failed);
    }

    #[test]
    fn phase_pending_before_any_start() {
        let fields = vec![progress(FieldState::Pending), progress(FieldState::Pending)];
        assert_eq!(MediaPhase::from_fields(&fields), MediaPhase::Pending);
        assert_eq!(MediaPhase::from_fields([]), MediaPhase::Pending);
    }
}
