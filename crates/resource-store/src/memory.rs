//! In-memory resource store for unit testing.
//!
//! Mirrors the behavior contract of [`crate::KubeStore`]: monotonically
//! increasing resource versions, conditional status writes, change events
//! for Provision and BootMedia objects. Also counts status writes so tests
//! can assert that no-op reconciles perform zero writes.

use crate::error::StoreError;
use crate::event::{ChangeEvent, ObjectKey, ObjectKind};
use crate::store::ResourceStore;
use crds::{BootMedia, BootMediaStatus, BootTarget, Machine, Provision, ProvisionStatus, ResponseTemplate};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

#[derive(Debug)]
struct Inner {
    machines: Mutex<HashMap<String, Machine>>,
    provisions: Mutex<HashMap<String, Provision>>,
    boot_targets: Mutex<HashMap<String, BootTarget>>,
    boot_media: Mutex<HashMap<String, BootMedia>>,
    templates: Mutex<HashMap<String, ResponseTemplate>>,
    config_maps: Mutex<HashMap<String, ConfigMap>>,
    secrets: Mutex<HashMap<String, Secret>>,
    version: AtomicU64,
    provision_status_writes: AtomicU64,
    boot_media_status_writes: AtomicU64,
    events: broadcast::Sender<ChangeEvent>,
}

/// In-memory store for tests.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                machines: Mutex::new(HashMap::new()),
                provisions: Mutex::new(HashMap::new()),
                boot_targets: Mutex::new(HashMap::new()),
                boot_media: Mutex::new(HashMap::new()),
                templates: Mutex::new(HashMap::new()),
                config_maps: Mutex::new(HashMap::new()),
                secrets: Mutex::new(HashMap::new()),
                version: AtomicU64::new(0),
                provision_status_writes: AtomicU64::new(0),
                boot_media_status_writes: AtomicU64::new(0),
                events,
            }),
        }
    }

    fn next_version(&self) -> String {
        (self.inner.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn emit(&self, kind: ObjectKind, namespace: &str, name: &str, deleted: bool) {
        let key = ObjectKey::new(kind, namespace, name);
        let _ = self.inner.events.send(ChangeEvent { key, deleted });
    }

    fn object_key<K: kube::Resource>(obj: &K) -> (String, String)
    where
        K::DynamicType: Default,
    {
        (
            obj.namespace().unwrap_or_else(|| "default".to_string()),
            obj.name_any(),
        )
    }

    /// Number of Provision status writes that were accepted.
    pub fn provision_status_writes(&self) -> u64 {
        self.inner.provision_status_writes.load(Ordering::SeqCst)
    }

    /// Number of BootMedia status writes that were accepted.
    pub fn boot_media_status_writes(&self) -> u64 {
        self.inner.boot_media_status_writes.load(Ordering::SeqCst)
    }

    /// Inserts or replaces a Machine, assigning a fresh resource version.
    pub fn put_machine(&self, mut obj: Machine) {
        obj.metadata.resource_version = Some(self.next_version());
        let (ns, name) = Self::object_key(&obj);
        self.inner
            .machines
            .lock()
            .expect("lock poisoned")
            .insert(key(&ns, &name), obj);
    }

    /// Inserts or replaces a Provision, assigning a fresh resource version
    /// and emitting a change event.
    pub fn put_provision(&self, mut obj: Provision) {
        obj.metadata.resource_version = Some(self.next_version());
        let (ns, name) = Self::object_key(&obj);
        self.inner
            .provisions
            .lock()
            .expect("lock poisoned")
            .insert(key(&ns, &name), obj);
        self.emit(ObjectKind::Provision, &ns, &name, false);
    }

    /// Removes a Provision and emits a deletion event.
    pub fn remove_provision(&self, namespace: &str, name: &str) {
        self.inner
            .provisions
            .lock()
            .expect("lock poisoned")
            .remove(&key(namespace, name));
        self.emit(ObjectKind::Provision, namespace, name, true);
    }

    /// Inserts or replaces a BootTarget.
    pub fn put_boot_target(&self, mut obj: BootTarget) {
        obj.metadata.resource_version = Some(self.next_version());
        let (ns, name) = Self::object_key(&obj);
        self.inner
            .boot_targets
            .lock()
            .expect("lock poisoned")
            .insert(key(&ns, &name), obj);
    }

    /// Inserts or replaces a BootMedia, assigning a fresh resource version
    /// and emitting a change event.
    pub fn put_boot_media(&self, mut obj: BootMedia) {
        obj.metadata.resource_version = Some(self.next_version());
        let (ns, name) = Self::object_key(&obj);
        self.inner
            .boot_media
            .lock()
            .expect("lock poisoned")
            .insert(key(&ns, &name), obj);
        self.emit(ObjectKind::BootMedia, &ns, &name, false);
    }

    /// Removes a BootMedia and emits a deletion event.
    pub fn remove_boot_media(&self, namespace: &str, name: &str) {
        self.inner
            .boot_media
            .lock()
            .expect("lock poisoned")
            .remove(&key(namespace, name));
        self.emit(ObjectKind::BootMedia, namespace, name, true);
    }

    /// Inserts or replaces a ResponseTemplate.
    pub fn put_response_template(&self, mut obj: ResponseTemplate) {
        obj.metadata.resource_version = Some(self.next_version());
        let (ns, name) = Self::object_key(&obj);
        self.inner
            .templates
            .lock()
            .expect("lock poisoned")
            .insert(key(&ns, &name), obj);
    }

    /// Inserts or replaces a ConfigMap.
    pub fn put_config_map(&self, mut obj: ConfigMap) {
        obj.metadata.resource_version = Some(self.next_version());
        let (ns, name) = Self::object_key(&obj);
        self.inner
            .config_maps
            .lock()
            .expect("lock poisoned")
            .insert(key(&ns, &name), obj);
    }

    /// Inserts or replaces a Secret.
    pub fn put_secret(&self, mut obj: Secret) {
        obj.metadata.resource_version = Some(self.next_version());
        let (ns, name) = Self::object_key(&obj);
        self.inner
            .secrets
            .lock()
            .expect("lock poisoned")
            .insert(key(&ns, &name), obj);
    }
}

#[async_trait::async_trait]
impl ResourceStore for MemoryStore {
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, StoreError> {
        Ok(self
            .inner
            .machines
            .lock()
            .expect("lock poisoned")
            .get(&key(namespace, name))
            .cloned())
    }

    async fn list_machines(&self, namespace: &str) -> Result<Vec<Machine>, StoreError> {
        let prefix = format!("{namespace}/");
        let mut items: Vec<Machine> = self
            .inner
            .machines
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect();
        items.sort_by_key(|obj| obj.name_any());
        Ok(items)
    }

    async fn get_provision(&self, namespace: &str, name: &str) -> Result<Option<Provision>, StoreError> {
        Ok(self
            .inner
            .provisions
            .lock()
            .expect("lock poisoned")
            .get(&key(namespace, name))
            .cloned())
    }

    async fn list_provisions(&self, namespace: &str) -> Result<Vec<Provision>, StoreError> {
        let prefix = format!("{namespace}/");
        let mut items: Vec<Provision> = self
            .inner
            .provisions
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect();
        items.sort_by_key(|obj| obj.name_any());
        Ok(items)
    }

    async fn get_boot_target(&self, namespace: &str, name: &str) -> Result<Option<BootTarget>, StoreError> {
        Ok(self
            .inner
            .boot_targets
            .lock()
            .expect("lock poisoned")
            .get(&key(namespace, name))
            .cloned())
    }

    async fn get_boot_media(&self, namespace: &str, name: &str) -> Result<Option<BootMedia>, StoreError> {
        Ok(self
            .inner
            .boot_media
            .lock()
            .expect("lock poisoned")
            .get(&key(namespace, name))
            .cloned())
    }

    async fn list_boot_media(&self, namespace: &str) -> Result<Vec<BootMedia>, StoreError> {
        let prefix = format!("{namespace}/");
        let mut items: Vec<BootMedia> = self
            .inner
            .boot_media
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect();
        items.sort_by_key(|obj| obj.name_any());
        Ok(items)
    }

    async fn get_response_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ResponseTemplate>, StoreError> {
        Ok(self
            .inner
            .templates
            .lock()
            .expect("lock poisoned")
            .get(&key(namespace, name))
            .cloned())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, StoreError> {
        Ok(self
            .inner
            .config_maps
            .lock()
            .expect("lock poisoned")
            .get(&key(namespace, name))
            .cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self
            .inner
            .secrets
            .lock()
            .expect("lock poisoned")
            .get(&key(namespace, name))
            .cloned())
    }

    async fn update_provision_status(
        &self,
        namespace: &str,
        name: &str,
        expected_version: &str,
        status: ProvisionStatus,
    ) -> Result<(), StoreError> {
        let next = self.next_version();
        {
            let mut map = self.inner.provisions.lock().expect("lock poisoned");
            let obj = map
                .get_mut(&key(namespace, name))
                .ok_or_else(|| StoreError::NotFound {
                    kind: ObjectKind::Provision,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })?;
            if obj.metadata.resource_version.as_deref() != Some(expected_version) {
                return Err(StoreError::Conflict {
                    kind: ObjectKind::Provision,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
            obj.status = Some(status);
            obj.metadata.resource_version = Some(next);
        }
        self.inner.provision_status_writes.fetch_add(1, Ordering::SeqCst);
        self.emit(ObjectKind::Provision, namespace, name, false);
        Ok(())
    }

    async fn update_boot_media_status(
        &self,
        namespace: &str,
        name: &str,
        expected_version: &str,
        status: BootMediaStatus,
    ) -> Result<(), StoreError> {
        let next = self.next_version();
        {
            let mut map = self.inner.boot_media.lock().expect("lock poisoned");
            let obj = map
                .get_mut(&key(namespace, name))
                .ok_or_else(|| StoreError::NotFound {
                    kind: ObjectKind::BootMedia,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })?;
            if obj.metadata.resource_version.as_deref() != Some(expected_version) {
                return Err(StoreError::Conflict {
                    kind: ObjectKind::BootMedia,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
            obj.status = Some(status);
            obj.metadata.resource_version = Some(next);
        }
        self.inner.boot_media_status_writes.fetch_add(1, Ordering::SeqCst);
        self.emit(ObjectKind::BootMedia, namespace, name, false);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.events.subscribe()
    }
}
