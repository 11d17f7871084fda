//! The download orchestrator.
//!
//! Classifies a BootMedia spec into a flow, lowers the flow into a plan
//! (network downloads, optional ISO extraction, optional firmware
//! concatenation), and executes the plan: cache evaluation first, then
//! concurrent verified downloads, then extraction, then the concatenation
//! barrier. Unverified bytes never reach a final path, and artifacts whose
//! verified digest still matches the declared checksum are never fetched
//! again.

use crate::checksum;
use crate::error::MediaError;
use crate::fetch::Fetcher;
use crate::firmware;
use crate::flow::{IsoExtraction, MediaFlow, classify};
use crate::iso;
use crate::layout::{MediaLayout, MediaPaths};
use crate::progress::{ProgressTracker, StatusPublisher};
use crds::boot_media::{
    BootMediaSpec, BootMediaStatus, FIELD_FIRMWARE, FIELD_FIRMWARE_INITRD, FIELD_INITRD, FIELD_ISO,
    FIELD_KERNEL, FieldState, MediaPhase,
};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
enum DownloadDest {
    /// Verified artifact is renamed to this path and gets a digest marker.
    Final(PathBuf),
    /// Artifact stays in the tmp dir (ISO images, firmware payloads).
    Temp,
}

#[derive(Debug, Clone)]
struct Download {
    field: &'static str,
    url: String,
    checksum: Option<String>,
    dest: DownloadDest,
}

#[derive(Debug, Clone)]
struct ExtractPlan {
    kernel_path: String,
    initrd_path: String,
    kernel_checksum: Option<String>,
    initrd_checksum: Option<String>,
    kernel_dest: PathBuf,
    initrd_dest: PathBuf,
}

#[derive(Debug, Clone)]
struct ConcatPlan {
    initrd_src: PathBuf,
}

#[derive(Debug, Clone)]
struct Plan {
    downloads: Vec<Download>,
    extraction: Option<ExtractPlan>,
    concat: Option<ConcatPlan>,
}

/// Executes BootMedia download flows against the shared media tree.
#[derive(Debug)]
pub struct DownloadOrchestrator {
    layout: MediaLayout,
    fetcher: Fetcher,
    download_slots: Arc<Semaphore>,
}

impl DownloadOrchestrator {
    pub fn new(layout: MediaLayout, fetcher: Fetcher, concurrent_downloads: usize) -> Self {
        Self {
            layout,
            fetcher,
            download_slots: Arc::new(Semaphore::new(concurrent_downloads.max(1))),
        }
    }

    /// Runs one reconcile pass for a BootMedia object and returns the final
    /// status snapshot. Field transitions are published as they happen.
    pub async fn run(
        &self,
        namespace: &str,
        name: &str,
        spec: &BootMediaSpec,
        publisher: &dyn StatusPublisher,
        cancel: &CancellationToken,
    ) -> BootMediaStatus {
        let flow = match classify(spec) {
            Ok(flow) => flow,
            Err(e) => {
                let status = BootMediaStatus {
                    phase: MediaPhase::Failed,
                    message: Some(e.to_string()),
                    ..BootMediaStatus::default()
                };
                publisher.publish(status.clone()).await;
                return status;
            }
        };

        let paths = self.layout.media_paths(namespace, name);
        let tracker = ProgressTracker::new(flow.declared_fields());
        if let Err(e) = paths.ensure_dirs(flow.uses_firmware()).await {
            let mut status = tracker.snapshot();
            status.phase = MediaPhase::Failed;
            status.message = Some(format!("failed to create media directories: {e}"));
            publisher.publish(status.clone()).await;
            return status;
        }

        let plan = build_plan(&flow, &paths);
        self.execute(&plan, &paths, &tracker, publisher, cancel).await;
        paths.clean_tmp().await;

        let status = tracker.snapshot();
        info!(
            "boot media {}/{} pass finished: {:?}",
            namespace, name, status.phase
        );
        status
    }

    async fn execute(
        &self,
        plan: &Plan,
        paths: &MediaPaths,
        tracker: &ProgressTracker,
        publisher: &dyn StatusPublisher,
        cancel: &CancellationToken,
    ) {
        let cached = self.evaluate_cache(plan, paths, tracker).await;
        if !cached.is_empty() {
            publisher.publish(tracker.snapshot()).await;
        }

        let pending: Vec<&Download> = plan
            .downloads
            .iter()
            .filter(|d| !cached.contains(d.field))
            .collect();
        join_all(pending.into_iter().map(|download| async move {
            self.execute_download(download, paths, tracker, publisher, cancel)
                .await;
        }))
        .await;

        if let Some(extract) = &plan.extraction {
            if !cached.contains(FIELD_ISO) && tracker.state(FIELD_ISO) == FieldState::Complete {
                let iso_path = paths.tmp_dir().join(FIELD_ISO);
                if !cached.contains(FIELD_KERNEL) && !cancel.is_cancelled() {
                    self.extract_one(
                        &iso_path,
                        &extract.kernel_path,
                        FIELD_KERNEL,
                        extract.kernel_checksum.as_deref(),
                        &extract.kernel_dest,
                        paths,
                        tracker,
                        publisher,
                    )
                    .await;
                }
                if !cached.contains(FIELD_INITRD) && !cancel.is_cancelled() {
                    self.extract_one(
                        &iso_path,
                        &extract.initrd_path,
                        FIELD_INITRD,
                        extract.initrd_checksum.as_deref(),
                        &extract.initrd_dest,
                        paths,
                        tracker,
                        publisher,
                    )
                    .await;
                }
            }
        }

        if let Some(concat) = &plan.concat {
            let already_built = cached.contains(FIELD_FIRMWARE_INITRD);
            let inputs_ready = tracker.state(FIELD_INITRD) == FieldState::Complete
                && tracker.state(FIELD_FIRMWARE) == FieldState::Complete;
            if !already_built && inputs_ready && !cancel.is_cancelled() {
                self.build_firmware_initrd(concat, paths, tracker, publisher).await;
            }
        }
    }

    /// Marks fields whose verified final artifacts are still valid, so their
    /// sources are not fetched again.
    async fn evaluate_cache(
        &self,
        plan: &Plan,
        paths: &MediaPaths,
        tracker: &ProgressTracker,
    ) -> BTreeSet<&'static str> {
        let mut cached = BTreeSet::new();

        for download in &plan.downloads {
            if let DownloadDest::Final(path) = &download.dest {
                if cache_hit(path, &paths.marker(download.field), download.checksum.as_deref()).await {
                    tracker.set_complete(download.field, file_size(path).await);
                    cached.insert(download.field);
                }
            }
        }

        if let Some(extract) = &plan.extraction {
            if cache_hit(
                &extract.kernel_dest,
                &paths.marker(FIELD_KERNEL),
                extract.kernel_checksum.as_deref(),
            )
            .await
            {
                tracker.set_complete(FIELD_KERNEL, file_size(&extract.kernel_dest).await);
                cached.insert(FIELD_KERNEL);
            }
            if cache_hit(
                &extract.initrd_dest,
                &paths.marker(FIELD_INITRD),
                extract.initrd_checksum.as_deref(),
            )
            .await
            {
                tracker.set_complete(FIELD_INITRD, file_size(&extract.initrd_dest).await);
                cached.insert(FIELD_INITRD);
            }
            // the ISO itself is only needed to produce the extracted artifacts
            if cached.contains(FIELD_KERNEL) && cached.contains(FIELD_INITRD) {
                tracker.set_complete(FIELD_ISO, 0);
                cached.insert(FIELD_ISO);
            }
        }

        if let Some(concat) = &plan.concat {
            let output = paths.with_firmware_initrd();
            if cached.contains(FIELD_INITRD)
                && cache_hit(&output, &paths.marker(FIELD_FIRMWARE_INITRD), None).await
            {
                let combined = file_size(&output).await;
                let base = file_size(&concat.initrd_src).await;
                tracker.set_complete(FIELD_FIRMWARE_INITRD, combined);
                tracker.set_complete(FIELD_FIRMWARE, combined.saturating_sub(base));
                cached.insert(FIELD_FIRMWARE_INITRD);
                cached.insert(FIELD_FIRMWARE);
            }
        }

        if !cached.is_empty() {
            debug!("cache hits for fields: {:?}", cached);
        }
        cached
    }

    async fn execute_download(
        &self,
        download: &Download,
        paths: &MediaPaths,
        tracker: &ProgressTracker,
        publisher: &dyn StatusPublisher,
        cancel: &CancellationToken,
    ) {
        let staging = paths.tmp_dir().join(download.field);
        let _permit = self
            .download_slots
            .acquire()
            .await
            .expect("download semaphore closed");
        if cancel.is_cancelled() {
            return;
        }

        tracker.set_downloading(download.field);
        publisher.publish(tracker.snapshot()).await;

        let fetched = self
            .fetcher
            .fetch_to_file(&download.url, &staging, cancel, |written, total| {
                tracker.set_bytes(download.field, written, total);
            })
            .await;
        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(MediaError::Cancelled) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return;
            }
            Err(e) => {
                warn!("download of field {} failed: {}", download.field, e);
                let _ = tokio::fs::remove_file(&staging).await;
                tracker.set_failed(download.field, e.to_string());
                publisher.publish(tracker.snapshot()).await;
                return;
            }
        };

        let digest = match checksum::sha256_file(&staging).await {
            Ok(digest) => digest,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                tracker.set_failed(download.field, format!("hashing failed: {e}"));
                publisher.publish(tracker.snapshot()).await;
                return;
            }
        };
        if let Some(expected) = &download.checksum {
            if let Err(e) = checksum::verify_digest(download.field, expected, &digest) {
                warn!("field {} rejected: {}", download.field, e);
                let _ = tokio::fs::remove_file(&staging).await;
                if let DownloadDest::Final(final_path) = &download.dest {
                    // a previously placed artifact no longer matches the
                    // declared digest either
                    let _ = tokio::fs::remove_file(final_path).await;
                    let _ = tokio::fs::remove_file(paths.marker(download.field)).await;
                }
                tracker.set_failed(download.field, e.to_string());
                publisher.publish(tracker.snapshot()).await;
                return;
            }
        }

        if let DownloadDest::Final(final_path) = &download.dest {
            if let Err(e) = place(&staging, final_path, &paths.marker(download.field), &digest).await
            {
                let _ = tokio::fs::remove_file(&staging).await;
                tracker.set_failed(download.field, e.to_string());
                publisher.publish(tracker.snapshot()).await;
                return;
            }
        }

        tracker.set_complete(download.field, bytes);
        publisher.publish(tracker.snapshot()).await;
    }

    #[allow(clippy::too_many_arguments, reason = "extraction carries its full addressing context")]
    async fn extract_one(
        &self,
        iso_path: &Path,
        inner_path: &str,
        field: &'static str,
        declared: Option<&str>,
        final_path: &Path,
        paths: &MediaPaths,
        tracker: &ProgressTracker,
        publisher: &dyn StatusPublisher,
    ) {
        tracker.set_downloading(field);
        publisher.publish(tracker.snapshot()).await;

        let staging = paths.tmp_dir().join(format!("{field}.extracted"));
        let extracted = iso::extract_file(
            iso_path.to_path_buf(),
            inner_path.to_string(),
            staging.clone(),
        )
        .await;
        let bytes = match extracted {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                tracker.set_failed(field, e.to_string());
                publisher.publish(tracker.snapshot()).await;
                return;
            }
        };

        let digest = match checksum::sha256_file(&staging).await {
            Ok(digest) => digest,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                tracker.set_failed(field, format!("hashing failed: {e}"));
                publisher.publish(tracker.snapshot()).await;
                return;
            }
        };
        if let Some(expected) = declared {
            if let Err(e) = checksum::verify_digest(field, expected, &digest) {
                warn!("extracted field {} rejected: {}", field, e);
                let _ = tokio::fs::remove_file(&staging).await;
                let _ = tokio::fs::remove_file(final_path).await;
                let _ = tokio::fs::remove_file(paths.marker(field)).await;
                tracker.set_failed(field, e.to_string());
                publisher.publish(tracker.snapshot()).await;
                return;
            }
        }

        if let Err(e) = place(&staging, final_path, &paths.marker(field), &digest).await {
            let _ = tokio::fs::remove_file(&staging).await;
            tracker.set_failed(field, e.to_string());
            publisher.publish(tracker.snapshot()).await;
            return;
        }
        tracker.set_complete(field, bytes);
        publisher.publish(tracker.snapshot()).await;
    }

    async fn build_firmware_initrd(
        &self,
        concat: &ConcatPlan,
        paths: &MediaPaths,
        tracker: &ProgressTracker,
        publisher: &dyn StatusPublisher,
    ) {
        tracker.set_downloading(FIELD_FIRMWARE_INITRD);
        publisher.publish(tracker.snapshot()).await;

        let firmware_path = paths.tmp_dir().join(FIELD_FIRMWARE);
        let output = paths.with_firmware_initrd();
        match firmware::concat_initrd(&concat.initrd_src, &firmware_path, &output).await {
            Ok(bytes) => {
                match checksum::sha256_file(&output).await {
                    Ok(digest) => {
                        if let Err(e) =
                            write_marker(&paths.marker(FIELD_FIRMWARE_INITRD), &digest).await
                        {
                            warn!("failed to record firmware initrd marker: {}", e);
                        }
                    }
                    Err(e) => warn!("failed to hash firmware initrd: {}", e),
                }
                tracker.set_complete(FIELD_FIRMWARE_INITRD, bytes);
            }
            Err(e) => {
                tracker.set_failed(FIELD_FIRMWARE_INITRD, e.to_string());
            }
        }
        publisher.publish(tracker.snapshot()).await;
    }
}

fn build_plan(flow: &MediaFlow, paths: &MediaPaths) -> Plan {
    let source = |field: &crate::flow::SourceField, dest: DownloadDest| Download {
        field: field.name,
        url: field.url.clone(),
        checksum: field.checksum.clone(),
        dest,
    };
    let extraction = |extract: &IsoExtraction, initrd_dest: PathBuf| ExtractPlan {
        kernel_path: extract.kernel_path.clone(),
        initrd_path: extract.initrd_path.clone(),
        kernel_checksum: extract.kernel_checksum.clone(),
        initrd_checksum: extract.initrd_checksum.clone(),
        kernel_dest: paths.kernel(),
        initrd_dest,
    };

    match flow {
        MediaFlow::Direct { kernel, initrd } => Plan {
            downloads: vec![
                source(kernel, DownloadDest::Final(paths.kernel())),
                source(initrd, DownloadDest::Final(paths.flat_initrd())),
            ],
            extraction: None,
            concat: None,
        },
        MediaFlow::DirectWithFirmware { kernel, initrd, firmware } => Plan {
            downloads: vec![
                source(kernel, DownloadDest::Final(paths.kernel())),
                source(initrd, DownloadDest::Final(paths.no_firmware_initrd())),
                source(firmware, DownloadDest::Temp),
            ],
            extraction: None,
            concat: Some(ConcatPlan {
                initrd_src: paths.no_firmware_initrd(),
            }),
        },
        MediaFlow::Iso { iso, extract } => Plan {
            downloads: vec![source(iso, DownloadDest::Temp)],
            extraction: Some(extraction(extract, paths.flat_initrd())),
            concat: None,
        },
        MediaFlow::IsoWithFirmware { iso, extract, firmware } => Plan {
            downloads: vec![
                source(iso, DownloadDest::Temp),
                source(firmware, DownloadDest::Temp),
            ],
            extraction: Some(extraction(extract, paths.no_firmware_initrd())),
            concat: Some(ConcatPlan {
                initrd_src: paths.no_firmware_initrd(),
            }),
        },
    }
}

/// A final artifact is reusable when it exists, its verified-digest marker
/// exists, and the declared checksum (if any) still matches the marker.
async fn cache_hit(final_path: &Path, marker_path: &Path, declared: Option<&str>) -> bool {
    let Ok(meta) = tokio::fs::metadata(final_path).await else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    let Ok(marker) = tokio::fs::read_to_string(marker_path).await else {
        return false;
    };
    let verified = marker.trim();
    match declared {
        Some(digest) => verified == digest,
        None => !verified.is_empty(),
    }
}

async fn place(
    staging: &Path,
    final_path: &Path,
    marker_path: &Path,
    digest: &str,
) -> Result<(), MediaError> {
    tokio::fs::rename(staging, final_path).await?;
    write_marker(marker_path, digest).await?;
    Ok(())
}

async fn write_marker(marker_path: &Path, digest: &str) -> Result<(), MediaError> {
    tokio::fs::write(marker_path, format!("{digest}\n")).await?;
    Ok(())
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}
