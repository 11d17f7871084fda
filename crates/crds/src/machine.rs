//! Machine CRD
//!
//! One physical machine, identified by MAC address and machine-id.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bootforge.io",
    version = "v1alpha1",
    kind = "Machine",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// MAC address of the machine's boot interface
    pub mac_address: String,

    /// systemd-style machine identity: exactly 32 lowercase hex characters
    pub machine_id: String,

    /// Intended hostname (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}
