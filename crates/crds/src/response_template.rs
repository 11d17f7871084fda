//! ResponseTemplate CRD and the rendered boot response.
//!
//! Templates carry `{{variable}}` placeholders resolved at render time from
//! the Provision's ConfigMaps and Secrets.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bootforge.io",
    version = "v1alpha1",
    kind = "ResponseTemplate",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTemplateSpec {
    /// Kernel command-line template ({{variable}} placeholders)
    #[serde(default)]
    pub cmdline: String,

    /// Boot message to display (optional, also templated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Additional initrd URLs appended after the media initrd
    #[serde(default)]
    pub extra_initrds: Vec<String>,
}

/// Rendered boot response for one machine, served to the boot-serving
/// process (Pixiecore API shape: kernel, initrd list, cmdline, message).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootResponse {
    /// Path of the kernel image relative to the media root
    pub kernel: String,

    /// Initrd paths, served in order
    #[serde(default)]
    pub initrd: Vec<String>,

    /// Fully rendered kernel command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmdline: Option<String>,

    /// Boot message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
