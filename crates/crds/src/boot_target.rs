//! BootTarget CRD
//!
//! Named bundle pointing at a ResponseTemplate and a BootMedia, with a
//! firmware-use flag. Immutable once referenced by an active Provision.

use crate::references::ResourceReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bootforge.io",
    version = "v1alpha1",
    kind = "BootTarget",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BootTargetSpec {
    /// Reference to the ResponseTemplate rendered for this target
    pub template_ref: ResourceReference,

    /// Reference to the BootMedia supplying kernel/initrd artifacts
    pub boot_media_ref: ResourceReference,

    /// Boot the firmware-merged initrd instead of the plain one
    #[serde(default)]
    pub use_firmware: bool,
}
