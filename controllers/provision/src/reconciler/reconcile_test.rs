//! State-machine tests for the Provision and BootMedia reconcilers,
//! running against the in-memory store.

use crate::controller::Context;
use crate::reconciler::boot_media::reconcile_boot_media;
use crate::reconciler::provision::reconcile_provision;
use boot_media::{DownloadOrchestrator, Fetcher, MediaLayout, RetryPolicy};
use chrono::Utc;
use crds::boot_media::{BootMediaSpec, BootMediaStatus, MediaChecksums, MediaPhase};
use crds::{
    BootMedia, BootTarget, BootTargetSpec, FailureReason, Machine, MachineSpec, Provision,
    ProvisionPhase, ProvisionSpec, ProvisionStatus, ResourceReference, ResponseTemplate,
    ResponseTemplateSpec,
};
use k8s_openapi::api::core::v1::ConfigMap;
use resource_store::{MemoryStore, ResourceStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const GOOD_ID: &str = "0123456789abcdef0123456789abcdef";

fn test_context(store: &MemoryStore, media_root: &Path) -> Context<MemoryStore> {
    let fetcher = Fetcher::new(RetryPolicy {
        attempts: 1,
        min_backoff_secs: 0,
        max_backoff_secs: 0,
        attempt_timeout: Duration::from_secs(5),
    })
    .unwrap();
    Context {
        store: Arc::new(store.clone()),
        orchestrator: DownloadOrchestrator::new(MediaLayout::new(media_root), fetcher, 2),
        provision_timeout: chrono::Duration::minutes(30),
        requeue_interval: Duration::from_secs(5),
    }
}

fn machine(machine_id: &str) -> Machine {
    let mut m = Machine::new(
        "m0",
        MachineSpec {
            mac_address: "52:54:00:12:34:56".to_string(),
            machine_id: machine_id.to_string(),
            hostname: None,
        },
    );
    m.metadata.namespace = Some("default".to_string());
    m
}

fn target(use_firmware: bool) -> BootTarget {
    let mut t = BootTarget::new(
        "t0",
        BootTargetSpec {
            template_ref: ResourceReference::bootforge("ResponseTemplate", "tpl"),
            boot_media_ref: ResourceReference::bootforge("BootMedia", "media0"),
            use_firmware,
        },
    );
    t.metadata.namespace = Some("default".to_string());
    t
}

fn direct_media_spec() -> BootMediaSpec {
    BootMediaSpec {
        kernel_url: Some("http://repo/vmlinuz".to_string()),
        initrd_url: Some("http://repo/initrd".to_string()),
        iso_url: None,
        iso_kernel_path: None,
        iso_initrd_path: None,
        firmware_url: None,
        checksums: MediaChecksums::default(),
    }
}

fn media0(spec: BootMediaSpec, status: Option<BootMediaStatus>) -> BootMedia {
    let mut m = BootMedia::new("media0", spec);
    m.metadata.namespace = Some("default".to_string());
    m.status = status;
    m
}

fn media_phase(phase: MediaPhase) -> Option<BootMediaStatus> {
    Some(BootMediaStatus {
        phase,
        ..BootMediaStatus::default()
    })
}

fn template(cmdline: &str) -> ResponseTemplate {
    let mut t = ResponseTemplate::new(
        "tpl",
        ResponseTemplateSpec {
            cmdline: cmdline.to_string(),
            message: None,
            extra_initrds: Vec::new(),
        },
    );
    t.metadata.namespace = Some("default".to_string());
    t
}

fn config_map(name: &str, pairs: &[(&str, &str)]) -> ConfigMap {
    let mut cm = ConfigMap::default();
    cm.metadata.name = Some(name.to_string());
    cm.metadata.namespace = Some("default".to_string());
    cm.data = Some(
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    );
    cm
}

fn provision(name: &str) -> Provision {
    let mut p = Provision::new(
        name,
        ProvisionSpec {
            machine_ref: ResourceReference::bootforge("Machine", "m0"),
            boot_target_ref: ResourceReference::bootforge("BootTarget", "t0"),
            config_map_refs: vec![ResourceReference::core("ConfigMap", "vars")],
            secret_refs: Vec::new(),
            timeout_minutes: None,
        },
    );
    p.metadata.namespace = Some("default".to_string());
    p
}

fn seed_ready_chain(store: &MemoryStore) {
    store.put_machine(machine(GOOD_ID));
    store.put_boot_target(target(false));
    store.put_boot_media(media0(direct_media_spec(), media_phase(MediaPhase::Complete)));
    store.put_response_template(template("hostname={{hostname}}"));
    store.put_config_map(config_map("vars", &[("hostname", "node-1")]));
}

async fn provision_status(store: &MemoryStore, name: &str) -> ProvisionStatus {
    store
        .get_provision("default", name)
        .await
        .unwrap()
        .unwrap()
        .status
        .unwrap()
}

#[tokio::test]
async fn dangling_machine_reference_fails_permanently() {
    let store = MemoryStore::new();
    store.put_provision(provision("p0"));
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    let requeue = reconcile_provision(&ctx, "default", "p0").await.unwrap();
    assert_eq!(requeue, None);

    let status = provision_status(&store, "p0").await;
    assert_eq!(status.phase, ProvisionPhase::Failed);
    assert_eq!(status.reason, Some(FailureReason::InvalidReference));
    assert!(status.message.unwrap().contains("Machine"));
    assert_eq!(store.provision_status_writes(), 1);

    // terminal phases never regress and never rewrite
    reconcile_provision(&ctx, "default", "p0").await.unwrap();
    assert_eq!(store.provision_status_writes(), 1);
}

#[tokio::test]
async fn uppercase_machine_id_is_a_validation_error() {
    let store = MemoryStore::new();
    store.put_machine(machine("0123456789ABCDEF0123456789abcdef"));
    store.put_provision(provision("p0"));
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    reconcile_provision(&ctx, "default", "p0").await.unwrap();

    let status = provision_status(&store, "p0").await;
    assert_eq!(status.phase, ProvisionPhase::Failed);
    assert_eq!(status.reason, Some(FailureReason::ValidationError));
    assert!(status.message.unwrap().contains("machineId"));
}

#[tokio::test]
async fn downloading_media_parks_the_provision() {
    let store = MemoryStore::new();
    seed_ready_chain(&store);
    store.put_boot_media(media0(direct_media_spec(), media_phase(MediaPhase::Downloading)));
    store.put_provision(provision("p0"));
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    let requeue = reconcile_provision(&ctx, "default", "p0").await.unwrap();
    // waiting is not a failure, and a re-check is scheduled even without
    // another media event
    assert_eq!(requeue, Some(Duration::from_secs(5)));
    let status = provision_status(&store, "p0").await;
    assert_eq!(status.phase, ProvisionPhase::WaitingForBootMedia);
    assert_eq!(status.reason, None);
    assert_eq!(store.provision_status_writes(), 1);

    // recomputing the same state writes nothing
    let requeue = reconcile_provision(&ctx, "default", "p0").await.unwrap();
    assert_eq!(requeue, Some(Duration::from_secs(5)));
    assert_eq!(store.provision_status_writes(), 1);
}

#[tokio::test]
async fn ready_chain_renders_and_completes() {
    let store = MemoryStore::new();
    seed_ready_chain(&store);
    store.put_provision(provision("p0"));
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    let requeue = reconcile_provision(&ctx, "default", "p0").await.unwrap();
    assert_eq!(requeue, None);

    let status = provision_status(&store, "p0").await;
    assert_eq!(status.phase, ProvisionPhase::Complete);
    assert!(status.started_at.is_some());
    assert_eq!(
        status.timeout_at,
        status.started_at.map(|t| t + chrono::Duration::minutes(30))
    );
    let rendered = status.rendered.unwrap();
    assert_eq!(rendered.kernel, "default/media0/kernel");
    assert_eq!(rendered.initrd, vec!["default/media0/initrd"]);
    assert_eq!(rendered.cmdline.as_deref(), Some("hostname=node-1"));
    // one InProgress write, one Complete write
    assert_eq!(store.provision_status_writes(), 2);

    reconcile_provision(&ctx, "default", "p0").await.unwrap();
    assert_eq!(store.provision_status_writes(), 2);
}

#[tokio::test]
async fn missing_template_fails_even_while_media_downloads() {
    let store = MemoryStore::new();
    store.put_machine(machine(GOOD_ID));
    store.put_boot_target(target(false));
    store.put_boot_media(media0(direct_media_spec(), media_phase(MediaPhase::Downloading)));
    store.put_provision(provision("p0"));
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    reconcile_provision(&ctx, "default", "p0").await.unwrap();

    let status = provision_status(&store, "p0").await;
    assert_eq!(status.phase, ProvisionPhase::Failed);
    assert_eq!(status.reason, Some(FailureReason::InvalidReference));
    assert!(status.message.unwrap().contains("ResponseTemplate"));
}

#[tokio::test]
async fn missing_config_map_fails_the_provision() {
    let store = MemoryStore::new();
    seed_ready_chain(&store);
    let mut p = provision("p0");
    p.spec.config_map_refs = vec![ResourceReference::core("ConfigMap", "absent")];
    store.put_provision(p);
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    reconcile_provision(&ctx, "default", "p0").await.unwrap();

    let status = provision_status(&store, "p0").await;
    assert_eq!(status.phase, ProvisionPhase::Failed);
    assert_eq!(status.reason, Some(FailureReason::InvalidReference));
    assert!(status.message.unwrap().contains("absent"));
}

#[tokio::test]
async fn unresolved_template_variable_is_a_render_error() {
    let store = MemoryStore::new();
    seed_ready_chain(&store);
    store.put_response_template(template("root={{missing_var}}"));
    store.put_provision(provision("p0"));
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    reconcile_provision(&ctx, "default", "p0").await.unwrap();

    let status = provision_status(&store, "p0").await;
    assert_eq!(status.phase, ProvisionPhase::Failed);
    assert_eq!(status.reason, Some(FailureReason::RenderError));
    assert!(status.message.unwrap().contains("missing_var"));
    // InProgress then Failed
    assert_eq!(store.provision_status_writes(), 2);

    // render failures are not retried
    reconcile_provision(&ctx, "default", "p0").await.unwrap();
    assert_eq!(store.provision_status_writes(), 2);
}

#[tokio::test]
async fn in_progress_past_the_ceiling_times_out() {
    let store = MemoryStore::new();
    seed_ready_chain(&store);
    let started = Utc::now() - chrono::Duration::minutes(31);
    let mut p = provision("p0");
    p.status = Some(ProvisionStatus {
        phase: ProvisionPhase::InProgress,
        message: Some("rendering boot response".to_string()),
        reason: None,
        started_at: Some(started),
        timeout_at: Some(started + chrono::Duration::minutes(30)),
        observed_generation: Some(0),
        rendered: None,
    });
    store.put_provision(p);
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    reconcile_provision(&ctx, "default", "p0").await.unwrap();

    let status = provision_status(&store, "p0").await;
    assert_eq!(status.phase, ProvisionPhase::Failed);
    assert_eq!(status.reason, Some(FailureReason::Timeout));
    // startedAt is preserved so the failure is attributable
    assert_eq!(status.started_at, Some(started));
}

#[tokio::test]
async fn generation_bump_reenters_the_state_machine() {
    let store = MemoryStore::new();
    seed_ready_chain(&store);
    let mut p = provision("p0");
    p.metadata.generation = Some(2);
    p.status = Some(ProvisionStatus {
        observed_generation: Some(1),
        ..ProvisionStatus::failed(FailureReason::InvalidReference, "old failure")
    });
    store.put_provision(p);
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    reconcile_provision(&ctx, "default", "p0").await.unwrap();

    let status = provision_status(&store, "p0").await;
    assert_eq!(status.phase, ProvisionPhase::Complete);
    assert_eq!(status.observed_generation, Some(2));
}

#[tokio::test]
async fn firmware_request_against_plain_media_is_a_validation_error() {
    let store = MemoryStore::new();
    seed_ready_chain(&store);
    store.put_boot_target(target(true));
    store.put_provision(provision("p0"));
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    reconcile_provision(&ctx, "default", "p0").await.unwrap();

    let status = provision_status(&store, "p0").await;
    assert_eq!(status.phase, ProvisionPhase::Failed);
    assert_eq!(status.reason, Some(FailureReason::ValidationError));
    assert!(status.message.unwrap().contains("firmware"));
}

#[tokio::test]
async fn boot_media_with_invalid_field_combination_fails() {
    let store = MemoryStore::new();
    let mut spec = direct_media_spec();
    spec.initrd_url = None;
    store.put_boot_media(media0(spec, None));
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    reconcile_boot_media(&ctx, "default", "media0", &CancellationToken::new())
        .await
        .unwrap();

    let media = store.get_boot_media("default", "media0").await.unwrap().unwrap();
    let status = media.status.unwrap();
    assert_eq!(status.phase, MediaPhase::Failed);
    assert!(status.message.unwrap().contains("initrdUrl"));
    let writes = store.boot_media_status_writes();
    assert!(writes >= 1);

    // terminal for this generation: nothing else is written
    reconcile_boot_media(&ctx, "default", "media0", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(store.boot_media_status_writes(), writes);
}

mod file_server {
    use axum::Router;
    use axum::extract::{Path as UrlPath, State};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct ServerState {
        files: Arc<HashMap<String, Vec<u8>>>,
        hits: Arc<AtomicUsize>,
    }

    async fn serve_file(
        State(state): State<ServerState>,
        UrlPath(name): UrlPath<String>,
    ) -> axum::response::Response {
        state.hits.fetch_add(1, Ordering::SeqCst);
        match state.files.get(&name) {
            Some(bytes) => bytes.clone().into_response(),
            None => axum::http::StatusCode::NOT_FOUND.into_response(),
        }
    }

    pub async fn start(files: HashMap<String, Vec<u8>>) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = ServerState {
            files: Arc::new(files),
            hits: hits.clone(),
        };
        let app = Router::new()
            .route("/files/{name}", get(serve_file))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/files"), hits)
    }
}

#[tokio::test]
async fn boot_media_download_completes_and_later_passes_are_no_ops() {
    let (base, hits) = file_server::start(std::collections::HashMap::from([
        ("kernel".to_string(), b"kernel bytes".to_vec()),
        ("initrd".to_string(), b"initrd bytes".to_vec()),
    ]))
    .await;

    let store = MemoryStore::new();
    let mut spec = direct_media_spec();
    spec.kernel_url = Some(format!("{base}/kernel"));
    spec.initrd_url = Some(format!("{base}/initrd"));
    store.put_boot_media(media0(spec, None));
    let root = tempfile::tempdir().unwrap();
    let ctx = test_context(&store, root.path());

    reconcile_boot_media(&ctx, "default", "media0", &CancellationToken::new())
        .await
        .unwrap();

    let media = store.get_boot_media("default", "media0").await.unwrap().unwrap();
    let status = media.status.unwrap();
    assert_eq!(status.phase, MediaPhase::Complete);
    assert!(status.fields.values().all(|f| f.error.is_none()));
    assert!(root.path().join("default/media0/kernel").exists());

    let writes = store.boot_media_status_writes();
    let requests = hits.load(std::sync::atomic::Ordering::SeqCst);
    assert_eq!(requests, 2);

    // already Complete at this generation: no writes, no downloads
    reconcile_boot_media(&ctx, "default", "media0", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(store.boot_media_status_writes(), writes);
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), requests);
}
