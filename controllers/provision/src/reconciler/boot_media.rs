//! BootMedia reconciliation.
//!
//! Drives the download orchestrator for one BootMedia key and publishes
//! per-field progress as conditional status writes. The orchestrator's
//! content-addressed caching makes repeated passes cheap; a status already
//! terminal for the current generation short-circuits without any I/O.

use crate::controller::Context;
use crate::error::ControllerError;
use boot_media::StatusPublisher;
use crds::boot_media::{BootMediaStatus, MediaPhase};
use resource_store::ResourceStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reconciles one BootMedia key.
pub async fn reconcile_boot_media<S: ResourceStore + 'static>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
    cancel: &CancellationToken,
) -> Result<Option<Duration>, ControllerError> {
    let Some(media) = ctx.store.get_boot_media(namespace, name).await? else {
        debug!("BootMedia {}/{} is gone, nothing to reconcile", namespace, name);
        return Ok(None);
    };
    let generation = media.metadata.generation.unwrap_or(0);
    let current = media.status.clone().unwrap_or_default();

    if current.observed_generation == Some(generation)
        && matches!(current.phase, MediaPhase::Complete | MediaPhase::Failed)
    {
        debug!(
            "BootMedia {}/{} is {:?} at generation {}, nothing to do",
            namespace, name, current.phase, generation
        );
        return Ok(None);
    }

    info!("reconciling BootMedia {}/{}", namespace, name);
    let publisher = StorePublisher {
        store: ctx.store.clone(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        generation,
    };
    let status = ctx
        .orchestrator
        .run(namespace, name, &media.spec, &publisher, cancel)
        .await;
    // transitions were published as they happened; this makes sure the
    // final snapshot landed even if an intermediate write was lost
    publisher.publish(status).await;
    Ok(None)
}

/// Publishes tracker snapshots as conditional writes against the object's
/// current resource version, re-reading and retrying on conflict so
/// concurrently completing fields never overwrite each other.
struct StorePublisher<S> {
    store: Arc<S>,
    namespace: String,
    name: String,
    generation: i64,
}

#[async_trait::async_trait]
impl<S: ResourceStore> StatusPublisher for StorePublisher<S> {
    async fn publish(&self, mut status: BootMediaStatus) {
        status.observed_generation = Some(self.generation);
        for _attempt in 0..3 {
            let current = match self.store.get_boot_media(&self.namespace, &self.name).await {
                Ok(Some(current)) => current,
                Ok(None) => return,
                Err(e) => {
                    warn!(
                        "cannot read BootMedia {}/{} for status publication: {}",
                        self.namespace, self.name, e
                    );
                    return;
                }
            };
            if current.status.as_ref() == Some(&status) {
                return;
            }
            let version = current.metadata.resource_version.unwrap_or_default();
            match self
                .store
                .update_boot_media_status(&self.namespace, &self.name, &version, status.clone())
                .await
            {
                Ok(()) => return,
                Err(e) if e.is_conflict() => {
                    debug!(
                        "status write for BootMedia {}/{} lost a version race, re-reading",
                        self.namespace, self.name
                    );
                }
                Err(e) => {
                    warn!(
                        "failed to publish BootMedia {}/{} status: {}",
                        self.namespace, self.name, e
                    );
                    return;
                }
            }
        }
        warn!(
            "giving up on BootMedia {}/{} status publication after repeated conflicts",
            self.namespace, self.name
        );
    }
}
