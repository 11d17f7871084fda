//! Controller configuration from environment variables.

use crate::error::ControllerError;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace the controller watches
    pub namespace: String,
    /// Root of the shared boot media tree
    pub media_root: PathBuf,
    /// Default InProgress ceiling for Provisions (spec.timeoutMinutes overrides)
    pub provision_timeout: chrono::Duration,
    /// Re-check interval while WaitingForBootMedia
    pub requeue_interval: Duration,
    /// Concurrent reconcile workers
    pub workers: usize,
    /// Concurrent artifact downloads per BootMedia pass
    pub download_concurrency: usize,
    /// Listen address of the boot API
    pub boot_api_addr: SocketAddr,
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ControllerError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("cannot parse {name}={raw:?}"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables, with defaults for
    /// everything.
    pub fn from_env() -> Result<Self, ControllerError> {
        let namespace = env::var("WATCH_NAMESPACE").unwrap_or_else(|_| "default".to_string());
        let media_root = env::var("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/bootforge/media"));
        let timeout_minutes: i64 = parsed_var("PROVISION_TIMEOUT_MINUTES", 30)?;
        if timeout_minutes <= 0 {
            return Err(ControllerError::InvalidConfig(
                "PROVISION_TIMEOUT_MINUTES must be positive".to_string(),
            ));
        }
        let requeue_seconds: u64 = parsed_var("REQUEUE_INTERVAL_SECONDS", 30)?;
        let workers: usize = parsed_var("RECONCILE_WORKERS", 4)?;
        let download_concurrency: usize = parsed_var("DOWNLOAD_CONCURRENCY", 4)?;
        let boot_api_addr: SocketAddr = parsed_var(
            "BOOT_API_ADDR",
            "0.0.0.0:8080"
                .parse()
                .map_err(|_| ControllerError::InvalidConfig("bad default address".to_string()))?,
        )?;

        Ok(Self {
            namespace,
            media_root,
            provision_timeout: chrono::Duration::minutes(timeout_minutes),
            requeue_interval: Duration::from_secs(requeue_seconds.max(1)),
            workers: workers.max(1),
            download_concurrency: download_concurrency.max(1),
            boot_api_addr,
        })
    }
}
