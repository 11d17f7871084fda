//! Provision CRD
//!
//! A request to boot/configure one Machine, tracked through a phase state machine.

use crate::references::ResourceReference;
use crate::response_template::BootResponse;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bootforge.io",
    version = "v1alpha1",
    kind = "Provision",
    namespaced,
    status = "ProvisionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionSpec {
    /// Reference to the Machine being provisioned
    pub machine_ref: ResourceReference,

    /// Reference to the BootTarget to boot into
    pub boot_target_ref: ResourceReference,

    /// ConfigMaps merged into the render variables, in order (later wins)
    #[serde(default)]
    pub config_map_refs: Vec<ResourceReference>,

    /// Secrets merged into the render variables, in order (later wins)
    #[serde(default)]
    pub secret_refs: Vec<ResourceReference>,

    /// Overrides the controller-wide InProgress timeout for this Provision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,
}

/// Phase state machine for a Provision.
///
/// Complete and Failed are terminal; a spec change (generation bump) is the
/// only path back to Pending.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum ProvisionPhase {
    /// Not yet validated
    #[default]
    Pending,

    /// Dependencies ready, rendering the boot response
    InProgress,

    /// BootMedia exists but is not yet Complete
    WaitingForBootMedia,

    /// Boot response rendered and published
    Complete,

    /// Provisioning failed; see reason/message
    Failed,
}

impl ProvisionPhase {
    /// Whether the phase can only be left via a generation bump.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Why a Provision entered the Failed phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum FailureReason {
    /// A referenced resource does not exist
    InvalidReference,

    /// A referenced resource failed validation (e.g. malformed machineId)
    ValidationError,

    /// Template rendering failed (e.g. unresolved variable)
    RenderError,

    /// Stuck InProgress past the configured ceiling
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionStatus {
    /// Current phase
    #[serde(default)]
    pub phase: ProvisionPhase,

    /// Human-readable detail for the current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Failure classification, set only in the Failed phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,

    /// When the Provision first entered InProgress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Hard deadline: startedAt plus the configured timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Spec generation this status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Rendered boot response, present once Complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<BootResponse>,
}

impl ProvisionStatus {
    /// Shorthand for a Failed status with a reason and message.
    pub fn failed(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            phase: ProvisionPhase::Failed,
            message: Some(message.into()),
            reason: Some(reason),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases() {
        assert!(ProvisionPhase::Complete.is_terminal());
        assert!(ProvisionPhase::Failed.is_terminal());
        assert!(!ProvisionPhase::Pending.is_terminal());
        assert!(!ProvisionPhase::InProgress.is_terminal());
        assert!(!ProvisionPhase::WaitingForBootMedia.is_terminal());
    }

    #[test]
    fn phase_serializes_as_bare_name() {
        let json = serde_json::to_string(&ProvisionPhase::WaitingForBootMedia).unwrap();
        assert_eq!(json, "\"WaitingForBootMedia\"");
    }
}
