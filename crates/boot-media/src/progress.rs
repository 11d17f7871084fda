//! Per-field download progress for one BootMedia object.
//!
//! The tracker is the in-memory source of truth during a reconcile pass;
//! snapshots are handed to a [`StatusPublisher`] on every state transition.
//! Publication is the caller's concern (the controller applies snapshots as
//! conditional writes against the object's current resource version).

use crds::{BootMediaStatus, FieldProgress, FieldState, MediaPhase};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Receives status snapshots as field states change.
#[async_trait::async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, status: BootMediaStatus);
}

/// Publisher that drops every snapshot. Used by tests that only care about
/// the final state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

#[async_trait::async_trait]
impl StatusPublisher for NullPublisher {
    async fn publish(&self, _status: BootMediaStatus) {}
}

/// Mapping from field name to download progress for one BootMedia.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    fields: Mutex<BTreeMap<String, FieldProgress>>,
}

impl ProgressTracker {
    /// Creates a tracker with every declared field in the Pending state.
    pub fn new(declared: impl IntoIterator<Item = &'static str>) -> Self {
        let fields = declared
            .into_iter()
            .map(|name| (name.to_string(), FieldProgress::default()))
            .collect();
        Self {
            fields: Mutex::new(fields),
        }
    }

    fn update(&self, field: &str, apply: impl FnOnce(&mut FieldProgress)) {
        let mut fields = self.fields.lock().expect("progress lock poisoned");
        apply(fields.entry(field.to_string()).or_default());
    }

    /// Marks a field as started.
    pub fn set_downloading(&self, field: &str) {
        self.update(field, |p| {
            p.state = FieldState::Downloading;
            p.error = None;
        });
    }

    /// Records transfer progress for an in-flight field.
    pub fn set_bytes(&self, field: &str, transferred: u64, total: Option<u64>) {
        self.update(field, |p| {
            p.bytes_transferred = transferred;
            if total.is_some() {
                p.total_bytes = total;
            }
        });
    }

    /// Marks a field as verified and placed, with its final byte count.
    pub fn set_complete(&self, field: &str, bytes: u64) {
        self.update(field, |p| {
            p.state = FieldState::Complete;
            p.bytes_transferred = bytes;
            p.error = None;
        });
    }

    /// Marks a field as failed.
    pub fn set_failed(&self, field: &str, error: impl Into<String>) {
        self.update(field, |p| {
            p.state = FieldState::Failed;
            p.error = Some(error.into());
        });
    }

    /// Current state of one field.
    pub fn state(&self, field: &str) -> FieldState {
        self.fields
            .lock()
            .expect("progress lock poisoned")
            .get(field)
            .map(|p| p.state)
            .unwrap_or_default()
    }

    /// Overall phase derived from the tracked fields.
    pub fn phase(&self) -> MediaPhase {
        let fields = self.fields.lock().expect("progress lock poisoned");
        MediaPhase::from_fields(fields.values())
    }

    /// Status snapshot suitable for publication.
    pub fn snapshot(&self) -> BootMediaStatus {
        let fields = self.fields.lock().expect("progress lock poisoned");
        BootMediaStatus {
            phase: MediaPhase::from_fields(fields.values()),
            fields: fields.clone(),
            observed_generation: None,
            message: None,
        }
    }
}
