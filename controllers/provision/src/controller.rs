//! Main controller implementation.
//!
//! Wires store change events into the per-key work queue and dispatches
//! reconcile passes on a bounded worker pool. Reconciliations for different
//! keys run concurrently; the queue guarantees the same key never does.

use crate::config::Config;
use crate::error::ControllerError;
use crate::queue::WorkQueue;
use crate::reconciler;
use boot_media::{DownloadOrchestrator, Fetcher, MediaLayout, RetryPolicy};
use kube::ResourceExt;
use resource_store::{ChangeEvent, ObjectKey, ObjectKind, ResourceStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Delay before retrying a key whose pass returned an error.
const ERROR_RETRY: Duration = Duration::from_secs(60);

/// Shared dependencies of every reconcile pass.
#[derive(Debug)]
pub struct Context<S> {
    pub store: Arc<S>,
    pub orchestrator: DownloadOrchestrator,
    pub provision_timeout: chrono::Duration,
    pub requeue_interval: Duration,
}

/// The provision controller: queue, workers, and event wiring.
#[derive(Debug)]
pub struct Controller<S> {
    ctx: Arc<Context<S>>,
    config: Config,
}

impl<S: ResourceStore + 'static> Controller<S> {
    /// Creates a controller over the given store.
    pub fn new(store: Arc<S>, config: Config) -> Result<Self, ControllerError> {
        let fetcher = Fetcher::new(RetryPolicy::default())?;
        let orchestrator = DownloadOrchestrator::new(
            MediaLayout::new(config.media_root.clone()),
            fetcher,
            config.download_concurrency,
        );
        let ctx = Arc::new(Context {
            store,
            orchestrator,
            provision_timeout: config.provision_timeout,
            requeue_interval: config.requeue_interval,
        });
        Ok(Self { ctx, config })
    }

    /// Runs the controller until the event stream closes.
    pub async fn run(self) -> Result<(), ControllerError> {
        let (queue, mut rx) = WorkQueue::new();

        let mut events = self.ctx.store.subscribe();
        {
            let ctx = self.ctx.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => handle_event(&ctx, &queue, event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("event stream lagged, {} notifications dropped", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        // startup resync: level-triggered reconciles recompute everything
        // from observed state, so enqueueing every key once is sufficient
        for provision in self.ctx.store.list_provisions(&self.config.namespace).await? {
            let ns = provision
                .namespace()
                .unwrap_or_else(|| self.config.namespace.clone());
            queue.enqueue(ObjectKey::new(ObjectKind::Provision, ns, provision.name_any()));
        }
        for media in self.ctx.store.list_boot_media(&self.config.namespace).await? {
            let ns = media
                .namespace()
                .unwrap_or_else(|| self.config.namespace.clone());
            queue.enqueue(ObjectKey::new(ObjectKind::BootMedia, ns, media.name_any()));
        }

        info!(
            "provision controller running with {} workers",
            self.config.workers
        );
        let workers = Arc::new(Semaphore::new(self.config.workers));
        while let Some(key) = rx.recv().await {
            let permit = workers
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");
            let ctx = self.ctx.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                let cancel = queue.begin(&key);
                let outcome = reconcile_key(&ctx, &key, &cancel).await;
                queue.finish(&key);
                drop(permit);

                let requeue_after = match outcome {
                    Ok(after) => after,
                    Err(e) => {
                        error!("reconciliation of {} failed: {}", key, e);
                        Some(ERROR_RETRY)
                    }
                };
                if let Some(delay) = requeue_after {
                    tokio::time::sleep(delay).await;
                    queue.enqueue(key);
                }
            });
        }
        Ok(())
    }
}

/// Dispatches one delivered key to its reconciler.
pub async fn reconcile_key<S: ResourceStore + 'static>(
    ctx: &Context<S>,
    key: &ObjectKey,
    cancel: &CancellationToken,
) -> Result<Option<Duration>, ControllerError> {
    match key.kind {
        ObjectKind::Provision => {
            reconciler::provision::reconcile_provision(ctx, &key.namespace, &key.name).await
        }
        ObjectKind::BootMedia => {
            reconciler::boot_media::reconcile_boot_media(ctx, &key.namespace, &key.name, cancel)
                .await
        }
        _ => Ok(None),
    }
}

async fn handle_event<S: ResourceStore>(
    ctx: &Arc<Context<S>>,
    queue: &Arc<WorkQueue>,
    event: ChangeEvent,
) {
    if event.deleted {
        // aborts in-flight downloads and temp files for the deleted object
        queue.cancel(&event.key);
    }
    if event.key.kind == ObjectKind::BootMedia {
        // wake every Provision whose chain runs through this media
        match provisions_for_media(ctx, &event.key).await {
            Ok(keys) => {
                for key in keys {
                    queue.enqueue(key);
                }
            }
            Err(e) => warn!("failed to resolve provisions for {}: {}", event.key, e),
        }
    }
    queue.enqueue(event.key);
}

async fn provisions_for_media<S: ResourceStore>(
    ctx: &Arc<Context<S>>,
    media_key: &ObjectKey,
) -> Result<Vec<ObjectKey>, ControllerError> {
    let mut keys = Vec::new();
    for provision in ctx.store.list_provisions(&media_key.namespace).await? {
        let ns = provision
            .namespace()
            .unwrap_or_else(|| media_key.namespace.clone());
        let target_ref = &provision.spec.boot_target_ref;
        let Some(target) = ctx
            .store
            .get_boot_target(target_ref.namespace_or(&ns), &target_ref.name)
            .await?
        else {
            continue;
        };
        let media_ref = &target.spec.boot_media_ref;
        if media_ref.name == media_key.name && media_ref.namespace_or(&ns) == media_key.namespace {
            keys.push(ObjectKey::new(ObjectKind::Provision, ns, provision.name_any()));
        }
    }
    Ok(keys)
}
