//! Periodic retention reconciliation.
//!
//! Two independent windows: remote segments are deleted past the long
//! remote window; local copies of already-uploaded segments are
//! deleted past a shorter local window. A segment still waiting on
//! upload is never deleted locally by age alone, so footage cannot be
//! lost ahead of a successful backup.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::models::SegmentStatus;
use crate::repository::{DeviceStore, SegmentStore};
use crate::storage::RemoteStorage;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub remote_deleted: usize,
    pub local_deleted: usize,
}

pub struct RetentionSweeper {
    storage: Arc<dyn RemoteStorage>,
    devices: Arc<dyn DeviceStore>,
    segments: Arc<dyn SegmentStore>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    #[must_use]
    pub fn new(
        storage: Arc<dyn RemoteStorage>,
        devices: Arc<dyn DeviceStore>,
        segments: Arc<dyn SegmentStore>,
        config: &RetentionConfig,
    ) -> Self {
        Self {
            storage,
            devices,
            segments,
            config: config.clone(),
        }
    }

    /// One reconciliation pass against the given wall-clock time.
    ///
    /// Local deletion runs first so a segment aging out of both
    /// windows in the same pass loses its local copy while still
    /// `Uploaded`, before the remote pass marks it `Deleted`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let local_deleted = self.sweep_local(now).await?;
        let remote_deleted = self.sweep_remote(now).await?;
        let report = SweepReport {
            remote_deleted,
            local_deleted,
        };
        if report != SweepReport::default() {
            info!(
                remote_deleted = report.remote_deleted,
                local_deleted = report.local_deleted,
                "retention sweep completed"
            );
        }
        Ok(report)
    }

    async fn sweep_local(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - chrono::Duration::days(self.config.local_days);
        let mut deleted = 0;

        for segment in self.segments.list().await? {
            if segment.started_at >= cutoff || segment.local_path.is_none() {
                continue;
            }
            // Re-read immediately before deleting: the upload pipeline
            // owns status transitions and may have moved this segment
            // since the listing.
            let Some(mut current) = self.segments.get(&segment.id).await? else {
                continue;
            };
            if current.status != SegmentStatus::Uploaded {
                debug!(
                    segment = %current.id,
                    status = %current.status,
                    "old local segment not yet uploaded, keeping"
                );
                continue;
            }
            let Some(path) = current.local_path.take() else {
                continue;
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "local segment delete failed");
                    continue;
                }
            }
            self.segments.upsert(current).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn sweep_remote(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - chrono::Duration::days(self.config.remote_days);
        let mut deleted = 0;

        for device in self.devices.list().await? {
            let entries = match self.storage.list(&device.id).await {
                Ok(entries) => entries,
                Err(e) => {
                    // One device's listing failure must not stop the sweep
                    warn!(device = %device.id, error = %e, "remote listing failed");
                    continue;
                }
            };
            let segments = self.segments.list_device(&device.id).await?;

            for entry in entries {
                if entry.started_at >= cutoff {
                    continue;
                }
                if let Err(e) = self.storage.delete(&entry.remote_id).await {
                    warn!(target = %entry.target, error = %e, "remote delete failed");
                    continue;
                }
                deleted += 1;
                debug!(target = %entry.target, "expired remote segment deleted");

                if let Some(record) = segments
                    .iter()
                    .find(|s| s.remote_target() == entry.target)
                {
                    let mut record = record.clone();
                    if record.status == SegmentStatus::Uploaded
                        && record.advance(SegmentStatus::Deleted).is_ok()
                    {
                        record.remote_id = None;
                        self.segments.upsert(record).await?;
                    }
                }
            }
        }
        Ok(deleted)
    }

    /// Background task running a sweep at the configured interval.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The immediate first tick is skipped so startup is quiet
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_at(Utc::now()).await {
                    warn!(error = %e, "retention sweep failed");
                }
            }
        })
    }
}
