//! The ResourceStore trait.
//!
//! This trait abstracts the versioned object store so controllers can be
//! unit-tested against an in-memory implementation. The concrete
//! [`crate::KubeStore`] implements it over the Kubernetes API.
//! All async methods must be `Send` to work with Tokio's work-stealing runtime.

use crate::error::StoreError;
use crate::event::ChangeEvent;
use crds::{BootMedia, BootMediaStatus, BootTarget, Machine, Provision, ProvisionStatus, ResponseTemplate};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use tokio::sync::broadcast;

/// Versioned, watchable store of BootForge resources.
///
/// Gets return `Ok(None)` for missing objects; status updates are
/// conditional on the resource version the caller read and fail with
/// [`StoreError::Conflict`] when stale.
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, StoreError>;
    async fn list_machines(&self, namespace: &str) -> Result<Vec<Machine>, StoreError>;

    async fn get_provision(&self, namespace: &str, name: &str) -> Result<Option<Provision>, StoreError>;
    async fn list_provisions(&self, namespace: &str) -> Result<Vec<Provision>, StoreError>;

    async fn get_boot_target(&self, namespace: &str, name: &str) -> Result<Option<BootTarget>, StoreError>;
    async fn get_boot_media(&self, namespace: &str, name: &str) -> Result<Option<BootMedia>, StoreError>;
    async fn list_boot_media(&self, namespace: &str) -> Result<Vec<BootMedia>, StoreError>;
    async fn get_response_template(&self, namespace: &str, name: &str) -> Result<Option<ResponseTemplate>, StoreError>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, StoreError>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;

    /// Replaces the Provision status iff `expected_version` is still current.
    async fn update_provision_status(
        &self,
        namespace: &str,
        name: &str,
        expected_version: &str,
        status: ProvisionStatus,
    ) -> Result<(), StoreError>;

    /// Replaces the BootMedia status iff `expected_version` is still current.
    async fn update_boot_media_status(
        &self,
        namespace: &str,
        name: &str,
        expected_version: &str,
        status: BootMediaStatus,
    ) -> Result<(), StoreError>;

    /// Subscribes to change notifications for Provision and BootMedia objects.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
