//! BootForge Provision Controller
//!
//! Reconciles the resources that drive network boot provisioning:
//! - Provision: validates the dependency chain, tracks the phase state
//!   machine, renders the per-machine boot response
//! - BootMedia: downloads and verifies kernel/initrd/ISO/firmware artifacts
//!   into the shared media tree
//!
//! The Pixiecore-compatible boot API rides in the same process and serves
//! the rendered responses to the boot-serving collaborator.

mod config;
mod controller;
mod error;
mod queue;
mod readiness;
mod reconciler;
mod render;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use boot_api::Accessor;
use resource_store::KubeStore;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting BootForge Provision Controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Media root: {}", config.media_root.display());
    info!(
        "  Provision timeout: {} minutes",
        config.provision_timeout.num_minutes()
    );
    info!("  Boot API: {}", config.boot_api_addr);

    let client = kube::Client::try_default()
        .await
        .map_err(|e| ControllerError::Store(resource_store::StoreError::Kube(e)))?;
    let store = Arc::new(KubeStore::new(client, config.namespace.clone()));
    let _watchers = store.spawn_watchers();

    // the boot API shares the process with the reconcilers
    let accessor = Arc::new(Accessor::new(store.clone(), config.namespace.clone()));
    let api_addr = config.boot_api_addr;
    tokio::spawn(async move {
        if let Err(e) = boot_api::serve(api_addr, accessor).await {
            error!("boot API server exited: {}", e);
        }
    });

    let controller = Controller::new(store, config)?;
    controller.run().await
}
