//! Typed read/update primitives over the resource store.
//!
//! These are the operations the boot-serving process consumes: machine
//! lookup by MAC, provision listing, merged render inputs, and final
//! artifact identity for Complete boot media.

use crate::error::AccessorError;
use crds::validation::mac_eq;
use crds::{BootTarget, Machine, Provision, ProvisionStatus, ResourceReference, ResponseTemplate};
use crds::boot_media::MediaPhase;
use boot_media::layout;
use kube::ResourceExt;
use resource_store::{ObjectKind, ResourceStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Final artifact identity of a Complete BootMedia. Never exposes
/// in-progress state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootArtifacts {
    /// Kernel path relative to the media root
    pub kernel_filename: String,
    /// Initrd path relative to the media root (firmware-merged when the
    /// media carries firmware)
    pub initrd_filename: String,
    /// Whether the media carries firmware
    pub has_firmware: bool,
}

/// Accessor service over one namespace of the store.
#[derive(Debug)]
pub struct Accessor<S> {
    store: Arc<S>,
    namespace: String,
}

impl<S: ResourceStore> Accessor<S> {
    pub fn new(store: Arc<S>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Machine lookup by MAC address, case-insensitive.
    pub async fn get_machine_by_mac(&self, mac: &str) -> Result<Machine, AccessorError> {
        let machines = self.store.list_machines(&self.namespace).await?;
        machines
            .into_iter()
            .find(|m| mac_eq(&m.spec.mac_address, mac))
            .ok_or_else(|| AccessorError::NotFound {
                kind: ObjectKind::Machine,
                name: mac.to_string(),
            })
    }

    /// Provisions referencing a machine, ordered by name.
    pub async fn get_provisions_by_machine(
        &self,
        machine: &Machine,
    ) -> Result<Vec<Provision>, AccessorError> {
        let machine_name = machine.name_any();
        Ok(self
            .store
            .list_provisions(&self.namespace)
            .await?
            .into_iter()
            .filter(|p| p.spec.machine_ref.name == machine_name)
            .collect())
    }

    pub async fn get_provision(&self, name: &str) -> Result<Provision, AccessorError> {
        self.store
            .get_provision(&self.namespace, name)
            .await?
            .ok_or_else(|| AccessorError::NotFound {
                kind: ObjectKind::Provision,
                name: name.to_string(),
            })
    }

    /// Conditional status update; conflicts propagate to the caller.
    pub async fn update_provision_status(
        &self,
        name: &str,
        expected_version: &str,
        status: ProvisionStatus,
    ) -> Result<(), AccessorError> {
        Ok(self
            .store
            .update_provision_status(&self.namespace, name, expected_version, status)
            .await?)
    }

    /// Merged ConfigMap data in reference order; later references win on
    /// key collisions.
    pub async fn get_config_maps(
        &self,
        refs: &[ResourceReference],
    ) -> Result<BTreeMap<String, String>, AccessorError> {
        let mut merged = BTreeMap::new();
        for reference in refs {
            let ns = reference.namespace_or(&self.namespace);
            let cm = self
                .store
                .get_config_map(ns, &reference.name)
                .await?
                .ok_or_else(|| AccessorError::NotFound {
                    kind: ObjectKind::ConfigMap,
                    name: reference.name.clone(),
                })?;
            if let Some(data) = cm.data {
                merged.extend(data);
            }
        }
        Ok(merged)
    }

    /// Merged Secret data in reference order; later references win.
    /// Values are decoded as UTF-8 (non-text values are lossily replaced).
    pub async fn get_secrets(
        &self,
        refs: &[ResourceReference],
    ) -> Result<BTreeMap<String, String>, AccessorError> {
        let mut merged = BTreeMap::new();
        for reference in refs {
            let ns = reference.namespace_or(&self.namespace);
            let secret = self
                .store
                .get_secret(ns, &reference.name)
                .await?
                .ok_or_else(|| AccessorError::NotFound {
                    kind: ObjectKind::Secret,
                    name: reference.name.clone(),
                })?;
            if let Some(data) = secret.data {
                for (k, v) in data {
                    merged.insert(k, String::from_utf8_lossy(&v.0).into_owned());
                }
            }
            if let Some(string_data) = secret.string_data {
                merged.extend(string_data);
            }
        }
        Ok(merged)
    }

    pub async fn get_response_template(&self, name: &str) -> Result<ResponseTemplate, AccessorError> {
        self.store
            .get_response_template(&self.namespace, name)
            .await?
            .ok_or_else(|| AccessorError::NotFound {
                kind: ObjectKind::ResponseTemplate,
                name: name.to_string(),
            })
    }

    pub async fn get_boot_target(&self, name: &str) -> Result<BootTarget, AccessorError> {
        self.store
            .get_boot_target(&self.namespace, name)
            .await?
            .ok_or_else(|| AccessorError::NotFound {
                kind: ObjectKind::BootTarget,
                name: name.to_string(),
            })
    }

    /// Final artifact identity of a BootMedia. Only Complete media is
    /// exposed; anything else is NotReady.
    pub async fn get_boot_media(&self, name: &str) -> Result<BootArtifacts, AccessorError> {
        let media = self
            .store
            .get_boot_media(&self.namespace, name)
            .await?
            .ok_or_else(|| AccessorError::NotFound {
                kind: ObjectKind::BootMedia,
                name: name.to_string(),
            })?;
        let phase = media.status.as_ref().map(|s| s.phase).unwrap_or_default();
        if phase != MediaPhase::Complete {
            return Err(AccessorError::NotReady(name.to_string()));
        }
        let has_firmware = media.spec.firmware_url.is_some();
        // firmware media advertises its merged initrd; the pair never yields None
        let initrd_filename =
            layout::serve_path_initrd(&self.namespace, name, has_firmware, has_firmware)
                .unwrap_or_default();
        Ok(BootArtifacts {
            kernel_filename: layout::serve_path_kernel(&self.namespace, name),
            initrd_filename,
            has_firmware,
        })
    }

    /// Single value from one ConfigMap.
    pub async fn get_config_map_value(
        &self,
        reference: &ResourceReference,
        key: &str,
    ) -> Result<String, AccessorError> {
        let ns = reference.namespace_or(&self.namespace);
        let cm = self
            .store
            .get_config_map(ns, &reference.name)
            .await?
            .ok_or_else(|| AccessorError::NotFound {
                kind: ObjectKind::ConfigMap,
                name: reference.name.clone(),
            })?;
        cm.data
            .as_ref()
            .and_then(|data| data.get(key))
            .cloned()
            .ok_or_else(|| AccessorError::KeyNotFound {
                name: reference.name.clone(),
                key: key.to_string(),
            })
    }
}
