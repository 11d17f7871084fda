//! HTTP surface of the boot API.
//!
//! Implements Pixiecore API mode: the boot-serving process asks
//! `GET /v1/boot/{mac}` and receives the rendered boot response of the
//! machine's first Complete Provision. Liveness and metrics probes ride on
//! the same listener.

use crate::accessor::Accessor;
use crate::error::AccessorError;
use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use crds::{BootResponse, ProvisionPhase};
use kube::ResourceExt;
use prometheus::{IntCounterVec, Opts, TextEncoder};
use resource_store::ResourceStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::LazyLock;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

static BOOT_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("bootforge_boot_requests_total", "Boot API lookups by outcome"),
        &["outcome"],
    )
    .expect("static metric definition");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("metric registration");
    counter
});

/// Builds the boot API router.
pub fn router<S: ResourceStore + 'static>(accessor: Arc<Accessor<S>>) -> Router {
    Router::new()
        .route("/v1/boot/{mac}", get(boot_config::<S>))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(accessor)
}

/// Binds and serves the boot API until the process exits.
pub async fn serve<S: ResourceStore + 'static>(
    addr: SocketAddr,
    accessor: Arc<Accessor<S>>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(accessor)).await
}

async fn boot_config<S: ResourceStore + 'static>(
    State(accessor): State<Arc<Accessor<S>>>,
    UrlPath(mac): UrlPath<String>,
) -> Response {
    if crds::validate_mac_address(&mac).is_err() {
        BOOT_REQUESTS.with_label_values(&["invalid"]).inc();
        return (StatusCode::BAD_REQUEST, format!("invalid MAC address {mac:?}")).into_response();
    }
    match lookup_boot_response(&accessor, &mac).await {
        Ok(response) => {
            BOOT_REQUESTS.with_label_values(&["served"]).inc();
            debug!("served boot response for {}", mac);
            axum::Json(response).into_response()
        }
        Err(e) if e.is_not_found() => {
            BOOT_REQUESTS.with_label_values(&["miss"]).inc();
            debug!("no boot response for {}: {}", mac, e);
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(e) => {
            BOOT_REQUESTS.with_label_values(&["error"]).inc();
            warn!("boot lookup for {} failed: {}", mac, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// The boot response of the machine's first Complete Provision, in name
/// order.
async fn lookup_boot_response<S: ResourceStore>(
    accessor: &Accessor<S>,
    mac: &str,
) -> Result<BootResponse, AccessorError> {
    let machine = accessor.get_machine_by_mac(mac).await?;
    let provisions = accessor.get_provisions_by_machine(&machine).await?;
    for provision in &provisions {
        if let Some(status) = &provision.status {
            if status.phase == ProvisionPhase::Complete {
                if let Some(rendered) = &status.rendered {
                    return Ok(rendered.clone());
                }
            }
        }
    }
    Err(AccessorError::NotFound {
        kind: resource_store::ObjectKind::Provision,
        name: machine.name_any(),
    })
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics() -> Response {
    let families = prometheus::gather();
    match TextEncoder::new().encode_to_string(&families) {
        Ok(body) => body.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
