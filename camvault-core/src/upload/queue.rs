//! Chronological per-device upload queue.
//!
//! One worker per device uploads exactly one segment at a time, pulled
//! in `started_at` order, so remote segments always appear in
//! non-decreasing chronological order per device even when local
//! finalization completed out of order. Workers for different devices
//! run concurrently, bounded by a global permit pool.

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::models::{DeviceId, RecordingSegment, SegmentId, SegmentStatus};
use crate::repository::SegmentStore;
use crate::storage::RemoteStorage;

pub struct UploadQueue {
    storage: Arc<dyn RemoteStorage>,
    segments: Arc<dyn SegmentStore>,
    config: UploadConfig,
    permits: Arc<Semaphore>,
    devices: DashMap<DeviceId, Arc<DeviceQueue>>,
    outstanding: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

struct DeviceQueue {
    pending: parking_lot::Mutex<BTreeMap<(DateTime<Utc>, SegmentId), RecordingSegment>>,
    wakeup: Notify,
    outstanding: AtomicUsize,
    idle: Notify,
    /// Set on removal; the worker exits once its pending map is empty.
    closed: AtomicBool,
}

impl UploadQueue {
    #[must_use]
    pub fn new(
        storage: Arc<dyn RemoteStorage>,
        segments: Arc<dyn SegmentStore>,
        config: &UploadConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            segments,
            config: config.clone(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_uploads)),
            devices: DashMap::new(),
            outstanding: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        })
    }

    /// Queue a finalized segment (or a failed one being retried) for
    /// upload. The status moves to `PendingUpload` and is persisted
    /// before the segment becomes visible to the worker.
    pub async fn enqueue(self: &Arc<Self>, mut segment: RecordingSegment) -> Result<()> {
        if segment.status != SegmentStatus::PendingUpload {
            segment.advance(SegmentStatus::PendingUpload)?;
        }
        self.segments.upsert(segment.clone()).await?;

        let queue = self.device_queue(&segment.device_id);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        queue.outstanding.fetch_add(1, Ordering::SeqCst);
        queue
            .pending
            .lock()
            .insert((segment.started_at, segment.id.clone()), segment);
        queue.wakeup.notify_one();
        Ok(())
    }

    /// Segments queued but not yet resolved (uploaded or given up on).
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until every queued upload has been resolved. Used on
    /// shutdown so finalized footage is not lost.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait until every queued upload for one device has been resolved.
    /// A device with no queue drains immediately.
    pub async fn drain_device(&self, device_id: &DeviceId) {
        let Some(queue) = self.devices.get(device_id).map(|q| q.clone()) else {
            return;
        };
        loop {
            let notified = queue.idle.notified();
            if queue.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Finish a deleted device's queued work, then retire its worker.
    /// The device gets a fresh queue if it ever comes back.
    pub async fn remove_device(&self, device_id: &DeviceId) {
        self.drain_device(device_id).await;
        if let Some((_, queue)) = self.devices.remove(device_id) {
            queue.closed.store(true, Ordering::SeqCst);
            queue.wakeup.notify_one();
        }
    }

    fn device_queue(self: &Arc<Self>, device_id: &DeviceId) -> Arc<DeviceQueue> {
        if let Some(queue) = self.devices.get(device_id) {
            return queue.clone();
        }
        let queue = self
            .devices
            .entry(device_id.clone())
            .or_insert_with(|| {
                Arc::new(DeviceQueue {
                    pending: parking_lot::Mutex::new(BTreeMap::new()),
                    wakeup: Notify::new(),
                    outstanding: AtomicUsize::new(0),
                    idle: Notify::new(),
                    closed: AtomicBool::new(false),
                })
            })
            .clone();
        let this = self.clone();
        let worker_queue = queue.clone();
        let device_id = device_id.clone();
        tokio::spawn(async move { this.run_worker(device_id, worker_queue).await });
        queue
    }

    async fn run_worker(self: Arc<Self>, device_id: DeviceId, queue: Arc<DeviceQueue>) {
        loop {
            let notified = queue.wakeup.notified();
            let next = {
                let mut pending = queue.pending.lock();
                pending.pop_first().map(|(_, segment)| segment)
            };
            match next {
                Some(segment) => {
                    // One permit per active upload, taken only while the
                    // transfer itself runs
                    let permit = match self.permits.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    self.upload_one(&device_id, segment).await;
                    drop(permit);
                    if queue.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
                        queue.idle.notify_waiters();
                    }
                    if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
                        self.drained.notify_waiters();
                    }
                }
                None => {
                    if queue.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    notified.await;
                }
            }
        }
    }

    async fn upload_one(&self, device_id: &DeviceId, mut segment: RecordingSegment) {
        let target = segment.remote_target();
        let Some(local_path) = segment.local_path.clone() else {
            warn!(device = %device_id, segment = %segment.id, "queued segment has no local file");
            return;
        };

        let attempt_timeout = Duration::from_secs(self.config.attempt_timeout_seconds);
        let attempt = || async {
            tokio::time::timeout(
                attempt_timeout,
                self.storage.upload(&local_path, &target),
            )
            .await
            .map_err(|_| Error::Upload(format!("upload of {target} timed out")))?
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(self.config.retry_base_seconds))
            .with_max_delay(Duration::from_secs(self.config.retry_cap_seconds))
            .with_max_times(self.config.max_attempts.saturating_sub(1) as usize);

        let result = attempt
            .retry(backoff)
            .notify(|err: &Error, delay: Duration| {
                warn!(segment = %target, error = %err, ?delay, "upload attempt failed, retrying");
            })
            .await;

        match result {
            Ok(remote_id) => {
                segment.remote_id = Some(remote_id);
                if let Err(e) = segment.advance(SegmentStatus::Uploaded) {
                    // The remote object exists regardless of the race;
                    // record it on the stored segment.
                    warn!(segment = %segment.id, error = %e, "upload raced a status change");
                    if let Ok(Some(mut stored)) = self.segments.get(&segment.id).await {
                        if stored.remote_id.is_none() {
                            stored.remote_id = segment.remote_id.clone();
                            self.persist(stored).await;
                        }
                    }
                    return;
                }
                info!(device = %device_id, segment = %target, "segment uploaded");
                self.persist(segment).await;
            }
            Err(e) => {
                // Standing warning; the local copy is retained so the
                // footage is not lost.
                error!(
                    device = %device_id,
                    segment = %target,
                    attempts = self.config.max_attempts,
                    error = %e,
                    "upload failed permanently, local copy retained"
                );
                if segment.advance(SegmentStatus::UploadFailed).is_ok() {
                    self.persist(segment).await;
                }
            }
        }
    }

    async fn persist(&self, segment: RecordingSegment) {
        if let Err(e) = self.segments.upsert(segment).await {
            error!(error = %e, "failed to persist segment status");
        }
    }
}
