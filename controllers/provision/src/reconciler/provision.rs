//! Provision reconciliation.
//!
//! Level-triggered: every pass recomputes the phase from the observed state
//! of the dependency chain and writes status only when it changed. Terminal
//! phases are re-entered only through a generation bump.

use crate::controller::Context;
use crate::error::ControllerError;
use crate::readiness::{self, BlockReason, Readiness};
use crate::render;
use boot_api::{Accessor, AccessorError};
use boot_media::layout;
use chrono::Utc;
use crds::{FailureReason, ProvisionPhase, ProvisionStatus};
use resource_store::{ResourceStore, StoreError};
use std::time::Duration;
use tracing::{debug, info};

/// Delay before re-reading after a lost optimistic-concurrency race.
const CONFLICT_RETRY: Duration = Duration::from_secs(1);

/// Reconciles one Provision key. Returns an optional requeue delay.
pub async fn reconcile_provision<S: ResourceStore + 'static>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
) -> Result<Option<Duration>, ControllerError> {
    let Some(provision) = ctx.store.get_provision(namespace, name).await? else {
        debug!("Provision {}/{} is gone, nothing to reconcile", namespace, name);
        return Ok(None);
    };
    let generation = provision.metadata.generation.unwrap_or(0);
    let version = provision.metadata.resource_version.clone().unwrap_or_default();
    let current = provision.status.clone().unwrap_or_default();

    // Complete/Failed are terminal for this generation; a spec change is the
    // only way back. Zero writes on this path.
    if current.observed_generation == Some(generation) && current.phase.is_terminal() {
        debug!(
            "Provision {}/{} is {:?} at generation {}, nothing to do",
            namespace, name, current.phase, generation
        );
        return Ok(None);
    }

    let spec = &provision.spec;
    let machine = ctx
        .store
        .get_machine(spec.machine_ref.namespace_or(namespace), &spec.machine_ref.name)
        .await?;
    let target = ctx
        .store
        .get_boot_target(
            spec.boot_target_ref.namespace_or(namespace),
            &spec.boot_target_ref.name,
        )
        .await?;

    let mut media = None;
    let mut media_name = String::new();
    let mut media_namespace = namespace.to_string();
    let mut template = None;
    let mut template_name = String::new();
    if let Some(target) = &target {
        let media_ref = &target.spec.boot_media_ref;
        media_name = media_ref.name.clone();
        media_namespace = media_ref.namespace_or(namespace).to_string();
        media = ctx.store.get_boot_media(&media_namespace, &media_name).await?;

        let template_ref = &target.spec.template_ref;
        template_name = template_ref.name.clone();
        template = ctx
            .store
            .get_response_template(template_ref.namespace_or(namespace), &template_ref.name)
            .await?;
    }

    // Machine identity is validated as soon as the machine resolves; a
    // malformed machineId is permanent, never normalized.
    if let Some(machine) = &machine {
        if let Err(e) = crds::validate_machine_id(&machine.spec.machine_id) {
            let status = failed(generation, FailureReason::ValidationError, e.to_string());
            return finalize(ctx, namespace, name, &version, &current, status, None).await;
        }
        if let Err(e) = crds::validate_mac_address(&machine.spec.mac_address) {
            let status = failed(generation, FailureReason::ValidationError, e.to_string());
            return finalize(ctx, namespace, name, &version, &current, status, None).await;
        }
    }

    // Dependency chain: Machine → BootTarget → BootMedia, in that order.
    let verdict = readiness::resolve(
        machine.as_ref(),
        &spec.machine_ref.name,
        target.as_ref(),
        &spec.boot_target_ref.name,
        media.as_ref(),
        &media_name,
    );
    if let Readiness::Blocked {
        resource,
        name: blocked,
        reason: BlockReason::NotFound,
    } = &verdict
    {
        let status = failed(
            generation,
            FailureReason::InvalidReference,
            format!("{resource} {blocked:?} not found"),
        );
        return finalize(ctx, namespace, name, &version, &current, status, None).await;
    }

    // The remaining references must also resolve before anything else: a
    // dangling template/ConfigMap/Secret is a permanent failure even while
    // the media is still downloading.
    let Some(template) = template else {
        let status = failed(
            generation,
            FailureReason::InvalidReference,
            format!("ResponseTemplate {template_name:?} not found"),
        );
        return finalize(ctx, namespace, name, &version, &current, status, None).await;
    };
    let accessor = Accessor::new(ctx.store.clone(), namespace);
    let mut vars = match accessor.get_config_maps(&spec.config_map_refs).await {
        Ok(vars) => vars,
        Err(AccessorError::Store(e)) => return Err(e.into()),
        Err(e) => {
            let status = failed(generation, FailureReason::InvalidReference, e.to_string());
            return finalize(ctx, namespace, name, &version, &current, status, None).await;
        }
    };
    match accessor.get_secrets(&spec.secret_refs).await {
        Ok(secrets) => vars.extend(secrets),
        Err(AccessorError::Store(e)) => return Err(e.into()),
        Err(e) => {
            let status = failed(generation, FailureReason::InvalidReference, e.to_string());
            return finalize(ctx, namespace, name, &version, &current, status, None).await;
        }
    }

    if let Readiness::Blocked {
        resource,
        name: blocked,
        reason: BlockReason::NotComplete,
    } = &verdict
    {
        let status = ProvisionStatus {
            phase: ProvisionPhase::WaitingForBootMedia,
            message: Some(format!("{resource} {blocked:?} is not yet complete")),
            observed_generation: Some(generation),
            ..ProvisionStatus::default()
        };
        // scheduled re-check defends against a missed media notification
        return finalize(
            ctx,
            namespace,
            name,
            &version,
            &current,
            status,
            Some(ctx.requeue_interval),
        )
        .await;
    }

    // Ready. Readiness::Ready implies the whole chain resolved.
    let (Some(_machine), Some(target), Some(media)) = (machine, target, media) else {
        return Ok(None);
    };

    let now = Utc::now();
    let started_at = if current.observed_generation == Some(generation) {
        current.started_at
    } else {
        None
    }
    .unwrap_or(now);
    let timeout = spec
        .timeout_minutes
        .map_or(ctx.provision_timeout, |minutes| {
            chrono::Duration::minutes(minutes as i64)
        });
    let timeout_at = started_at + timeout;

    // Hard ceiling, checked on every pass and independent of the render
    // outcome below.
    if now > timeout_at {
        let status = ProvisionStatus {
            started_at: Some(started_at),
            timeout_at: Some(timeout_at),
            ..failed(
                generation,
                FailureReason::Timeout,
                format!(
                    "provisioning did not complete within {} minutes",
                    timeout.num_minutes()
                ),
            )
        };
        return finalize(ctx, namespace, name, &version, &current, status, None).await;
    }

    // Persist InProgress before rendering so startedAt/timeoutAt are
    // observable even if this pass dies mid-render.
    let in_progress = ProvisionStatus {
        phase: ProvisionPhase::InProgress,
        message: Some("rendering boot response".to_string()),
        reason: None,
        started_at: Some(started_at),
        timeout_at: Some(timeout_at),
        observed_generation: Some(generation),
        rendered: None,
    };
    let mut write_version = version.clone();
    if current != in_progress {
        match ctx
            .store
            .update_provision_status(namespace, name, &write_version, in_progress.clone())
            .await
        {
            Ok(()) => match ctx.store.get_provision(namespace, name).await? {
                Some(fresh) => {
                    write_version = fresh.metadata.resource_version.unwrap_or_default();
                }
                None => return Ok(None),
            },
            Err(e) if e.is_conflict() => return Ok(Some(CONFLICT_RETRY)),
            Err(e) => return Err(e.into()),
        }
    }

    let kernel = layout::serve_path_kernel(&media_namespace, &media_name);
    let media_has_firmware = media.spec.firmware_url.is_some();
    let initrd = layout::serve_path_initrd(
        &media_namespace,
        &media_name,
        media_has_firmware,
        target.spec.use_firmware,
    );
    let Some(initrd) = initrd else {
        let status = ProvisionStatus {
            started_at: Some(started_at),
            timeout_at: Some(timeout_at),
            ..failed(
                generation,
                FailureReason::ValidationError,
                format!("boot target requests firmware but boot media {media_name:?} has none"),
            )
        };
        return finalize(ctx, namespace, name, &write_version, &in_progress, status, None).await;
    };

    let status = match render::render_response(&template.spec, &kernel, &initrd, &vars) {
        Ok(rendered) => {
            info!("Provision {}/{} complete", namespace, name);
            ProvisionStatus {
                phase: ProvisionPhase::Complete,
                message: Some("boot response rendered".to_string()),
                reason: None,
                started_at: Some(started_at),
                timeout_at: Some(timeout_at),
                observed_generation: Some(generation),
                rendered: Some(rendered),
            }
        }
        // render failures are not retried; they need a spec or config fix
        Err(e) => ProvisionStatus {
            started_at: Some(started_at),
            timeout_at: Some(timeout_at),
            ..failed(generation, FailureReason::RenderError, e.to_string())
        },
    };
    finalize(ctx, namespace, name, &write_version, &in_progress, status, None).await
}

fn failed(generation: i64, reason: FailureReason, message: String) -> ProvisionStatus {
    ProvisionStatus {
        observed_generation: Some(generation),
        ..ProvisionStatus::failed(reason, message)
    }
}

/// Writes the computed status if it differs from the current one. A pass
/// that computes no change performs no write.
async fn finalize<S: ResourceStore>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
    version: &str,
    current: &ProvisionStatus,
    next: ProvisionStatus,
    requeue: Option<Duration>,
) -> Result<Option<Duration>, ControllerError> {
    if *current == next {
        return Ok(requeue);
    }
    match ctx
        .store
        .update_provision_status(namespace, name, version, next)
        .await
    {
        Ok(()) => Ok(requeue),
        Err(e) if e.is_conflict() => {
            debug!(
                "status write for Provision {}/{} lost a version race, requeueing",
                namespace, name
            );
            Ok(Some(CONFLICT_RETRY))
        }
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
