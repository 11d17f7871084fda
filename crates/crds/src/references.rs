//! Kubernetes object references for BootForge CRDs
//!
//! Provides standard Kubernetes-style object references for cross-resource references.
//! Follows Kubernetes TypedLocalObjectReference pattern with apiGroup, kind, name, and optional namespace.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kubernetes-compliant resource reference for BootForge CRDs
///
/// This follows the Kubernetes `TypedLocalObjectReference` pattern, which includes:
/// - `apiGroup`: The API group of the referenced resource (e.g., "bootforge.io")
/// - `kind`: The kind of the referenced resource (e.g., "BootTarget")
/// - `name`: The name of the referenced resource (required)
/// - `namespace`: The namespace of the referenced resource (optional, defaults to same namespace)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    /// API group of the referenced resource (e.g., "bootforge.io", "" for core resources)
    #[serde(default)]
    pub api_group: String,

    /// Kind of the referenced resource (e.g., "Machine", "BootTarget", "ConfigMap")
    pub kind: String,

    /// Name of the referenced resource
    pub name: String,

    /// Namespace of the referenced resource (defaults to same namespace as the referencing resource)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceReference {
    /// Create a new reference with apiGroup, kind, and name (same namespace)
    pub fn new(api_group: String, kind: String, name: String) -> Self {
        Self {
            api_group,
            kind,
            name,
            namespace: None,
        }
    }

    /// Helper to create a reference for a BootForge CRD in the `bootforge.io` group
    pub fn bootforge(kind: &str, name: impl Into<String>) -> Self {
        Self {
            api_group: crate::API_GROUP.to_string(),
            kind: kind.to_string(),
            name: name.into(),
            namespace: None,
        }
    }

    /// Helper to create a reference for a core (ConfigMap/Secret) resource
    pub fn core(kind: &str, name: impl Into<String>) -> Self {
        Self {
            api_group: String::new(),
            kind: kind.to_string(),
            name: name.into(),
            namespace: None,
        }
    }

    /// Resolve the namespace this reference points into, given the referencing object's namespace.
    pub fn namespace_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(fallback)
    }
}
