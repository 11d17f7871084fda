//! Kubernetes-backed resource store.
//!
//! Translates [`ResourceStore`] operations to the Kubernetes API. Status
//! updates embed the caller's resource version in a merge patch so the API
//! server enforces optimistic concurrency; HTTP 409 maps to
//! [`StoreError::Conflict`].

use crate::error::StoreError;
use crate::event::{ChangeEvent, ObjectKey, ObjectKind};
use crate::store::ResourceStore;
use crds::{BootMedia, BootMediaStatus, BootTarget, Machine, Provision, ProvisionStatus, ResponseTemplate};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::watcher;
use kube_runtime::watcher::Event;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Store implementation over a Kubernetes cluster.
pub struct KubeStore {
    client: Client,
    namespace: String,
    events: broadcast::Sender<ChangeEvent>,
}

impl fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Creates a store scoped to one namespace.
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            client,
            namespace: namespace.into(),
            events,
        }
    }

    /// Starts the Provision and BootMedia watch streams feeding
    /// [`ResourceStore::subscribe`] receivers.
    pub fn spawn_watchers(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_watch::<Provision>(ObjectKind::Provision),
            self.spawn_watch::<BootMedia>(ObjectKind::BootMedia),
        ]
    }

    fn spawn_watch<K>(&self, kind: ObjectKind) -> JoinHandle<()>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + fmt::Debug
            + Send
            + DeserializeOwned
            + 'static,
        K::DynamicType: Default + Clone,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        let events = self.events.clone();
        tokio::spawn(async move {
            let stream = watcher(api, watcher::Config::default());
            futures::pin_mut!(stream);
            while let Some(entry) = stream.next().await {
                match entry {
                    Ok(Event::Apply(obj) | Event::InitApply(obj)) => {
                        send_change(&events, kind, &obj, false);
                    }
                    Ok(Event::Delete(obj)) => send_change(&events, kind, &obj, true),
                    Ok(Event::Init | Event::InitDone) => {}
                    Err(e) => {
                        warn!("watch stream error for {}: {}", kind, e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        })
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt_obj<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + fmt::Debug + DeserializeOwned,
        K::DynamicType: Default,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list_obj<K>(&self, namespace: &str) -> Result<Vec<K>, StoreError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + fmt::Debug + DeserializeOwned,
        K::DynamicType: Default,
    {
        Ok(self
            .api::<K>(namespace)
            .list(&ListParams::default())
            .await?
            .items)
    }

    async fn patch_status_conditional<K, S>(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        expected_version: &str,
        status: S,
    ) -> Result<(), StoreError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + fmt::Debug + DeserializeOwned,
        K::DynamicType: Default,
        S: Serialize,
    {
        // The resourceVersion in the merge patch body makes the API server
        // reject the write with 409 when the object moved underneath us.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": expected_version },
            "status": status,
        });
        let result = self
            .api::<K>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(StoreError::Conflict {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(StoreError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(StoreError::Kube(e)),
        }
    }
}

fn send_change<K>(events: &broadcast::Sender<ChangeEvent>, kind: ObjectKind, obj: &K, deleted: bool)
where
    K: kube::Resource,
    K::DynamicType: Default,
{
    let key = ObjectKey::new(kind, obj.namespace().unwrap_or_default(), obj.name_any());
    // a send error only means nothing is subscribed yet
    let _ = events.send(ChangeEvent { key, deleted });
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, StoreError> {
        self.get_opt_obj(namespace, name).await
    }

    async fn list_machines(&self, namespace: &str) -> Result<Vec<Machine>, StoreError> {
        self.list_obj(namespace).await
    }

    async fn get_provision(&self, namespace: &str, name: &str) -> Result<Option<Provision>, StoreError> {
        self.get_opt_obj(namespace, name).await
    }

    async fn list_provisions(&self, namespace: &str) -> Result<Vec<Provision>, StoreError> {
        self.list_obj(namespace).await
    }

    async fn get_boot_target(&self, namespace: &str, name: &str) -> Result<Option<BootTarget>, StoreError> {
        self.get_opt_obj(namespace, name).await
    }

    async fn get_boot_media(&self, namespace: &str, name: &str) -> Result<Option<BootMedia>, StoreError> {
        self.get_opt_obj(namespace, name).await
    }

    async fn list_boot_media(&self, namespace: &str) -> Result<Vec<BootMedia>, StoreError> {
        self.list_obj(namespace).await
    }

    async fn get_response_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ResponseTemplate>, StoreError> {
        self.get_opt_obj(namespace, name).await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, StoreError> {
        self.get_opt_obj(namespace, name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        self.get_opt_obj(namespace, name).await
    }

    async fn update_provision_status(
        &self,
        namespace: &str,
        name: &str,
        expected_version: &str,
        status: ProvisionStatus,
    ) -> Result<(), StoreError> {
        self.patch_status_conditional::<Provision, _>(
            ObjectKind::Provision,
            namespace,
            name,
            expected_version,
            status,
        )
        .await
    }

    async fn update_boot_media_status(
        &self,
        namespace: &str,
        name: &str,
        expected_version: &str,
        status: BootMediaStatus,
    ) -> Result<(), StoreError> {
        self.patch_status_conditional::<BootMedia, _>(
            ObjectKind::BootMedia,
            namespace,
            name,
            expected_version,
            status,
        )
        .await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}
