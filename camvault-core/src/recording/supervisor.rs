use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::capture::{CaptureEvent, CaptureHandle, CaptureLauncher, FinalizedSegment};
use crate::config::RecordingConfig;
use crate::error::{Error, Result};
use crate::models::{DeviceId, DeviceRecord, RecordingSegment};
use crate::repository::SegmentStore;
use crate::session::SessionPool;
use crate::upload::UploadQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Recording,
    Crashed,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Recording => "recording",
            Self::Crashed => "crashed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct RecordingStatus {
    pub state: SupervisorState,
    /// Set while the device is crash-looping; backoff continues
    pub degraded: bool,
    pub restarts: u32,
}

struct SupervisorEntry {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    status: Arc<parking_lot::Mutex<RecordingStatus>>,
}

/// Owns the supervisors, one per device with recording enabled.
pub struct RecordingManager {
    pool: Arc<SessionPool>,
    launcher: Arc<dyn CaptureLauncher>,
    segments: Arc<dyn SegmentStore>,
    uploads: Arc<UploadQueue>,
    config: RecordingConfig,
    storage_configured: bool,
    supervisors: DashMap<DeviceId, SupervisorEntry>,
}

impl RecordingManager {
    #[must_use]
    pub fn new(
        pool: Arc<SessionPool>,
        launcher: Arc<dyn CaptureLauncher>,
        segments: Arc<dyn SegmentStore>,
        uploads: Arc<UploadQueue>,
        config: &RecordingConfig,
        storage_configured: bool,
    ) -> Self {
        Self {
            pool,
            launcher,
            segments,
            uploads,
            config: config.clone(),
            storage_configured,
            supervisors: DashMap::new(),
        }
    }

    /// Start supervised recording for a device.
    ///
    /// Configuration problems are fatal here, not deferred to first
    /// use: a device that cannot possibly record is rejected up front.
    pub fn enable(&self, device: &DeviceRecord) -> Result<()> {
        if !device.recordable {
            return Err(Error::InvalidInput(format!(
                "device {} does not support recording",
                device.id
            )));
        }
        if device.credentials.is_empty() {
            return Err(Error::Config(format!(
                "device {} has no credentials",
                device.id
            )));
        }
        if !self.storage_configured {
            return Err(Error::Config(
                "remote storage is not configured, refusing to record".to_string(),
            ));
        }
        if self.supervisors.contains_key(&device.id) {
            debug!(device = %device.id, "recording already enabled");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let status = Arc::new(parking_lot::Mutex::new(RecordingStatus {
            state: SupervisorState::Starting,
            degraded: false,
            restarts: 0,
        }));
        let supervisor = Supervisor {
            device: device.clone(),
            pool: self.pool.clone(),
            launcher: self.launcher.clone(),
            segments: self.segments.clone(),
            uploads: self.uploads.clone(),
            config: self.config.clone(),
            cancel: cancel.clone(),
            status: status.clone(),
        };
        let task = tokio::spawn(supervisor.run());
        self.supervisors.insert(
            device.id.clone(),
            SupervisorEntry {
                cancel,
                task,
                status,
            },
        );
        info!(device = %device.id, "recording enabled");
        Ok(())
    }

    /// Stop a device's supervisor, waiting for the in-progress segment
    /// to finalize (bounded by the stop grace period).
    pub async fn disable(&self, device_id: &DeviceId) {
        let Some((_, entry)) = self.supervisors.remove(device_id) else {
            return;
        };
        entry.cancel.cancel();
        if entry.task.await.is_err() {
            warn!(device = %device_id, "supervisor task panicked during disable");
        }
        info!(device = %device_id, "recording disabled");
    }

    #[must_use]
    pub fn status(&self, device_id: &DeviceId) -> Option<RecordingStatus> {
        self.supervisors
            .get(device_id)
            .map(|entry| entry.status.lock().clone())
    }

    /// Disable every supervisor. Queued uploads are left to the upload
    /// pipeline's own drain.
    pub async fn shutdown(&self) {
        let ids: Vec<DeviceId> = self.supervisors.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.disable(&id).await;
        }
    }
}

enum RunEnd {
    Stopped,
    Crashed,
}

struct Supervisor {
    device: DeviceRecord,
    pool: Arc<SessionPool>,
    launcher: Arc<dyn CaptureLauncher>,
    segments: Arc<dyn SegmentStore>,
    uploads: Arc<UploadQueue>,
    config: RecordingConfig,
    cancel: CancellationToken,
    status: Arc<parking_lot::Mutex<RecordingStatus>>,
}

impl Supervisor {
    async fn run(self) {
        let base = Duration::from_secs(self.config.restart_backoff_base_seconds);
        let cap = Duration::from_secs(self.config.restart_backoff_cap_seconds);
        let healthy_reset = Duration::from_secs(self.config.healthy_reset_seconds);
        let burst_window = Duration::from_secs(self.config.crash_burst_window_seconds);

        let mut backoff = base;
        let mut crash_times: VecDeque<Instant> = VecDeque::new();

        loop {
            self.set_state(SupervisorState::Starting);
            let run_started = Instant::now();

            let end = tokio::select! {
                handle = self.start_capture() => match handle {
                    Ok(mut handle) => self.consume(&mut handle).await,
                    Err(e) => {
                        warn!(device = %self.device.id, error = %e, "capture start failed");
                        RunEnd::Crashed
                    }
                },
                _ = self.cancel.cancelled() => RunEnd::Stopped,
            };

            if matches!(end, RunEnd::Stopped) {
                self.set_state(SupervisorState::Stopped);
                return;
            }

            // Crash accounting. A sustained healthy run resets the
            // backoff and clears the degraded flag.
            if run_started.elapsed() >= healthy_reset {
                backoff = base;
                crash_times.clear();
                self.status.lock().degraded = false;
            }
            let now = Instant::now();
            while crash_times
                .front()
                .is_some_and(|t| now.duration_since(*t) > burst_window)
            {
                crash_times.pop_front();
            }
            crash_times.push_back(now);
            if crash_times.len() as u32 >= self.config.crash_burst_threshold {
                let mut status = self.status.lock();
                if !status.degraded {
                    status.degraded = true;
                    warn!(
                        device = %self.device.id,
                        crashes = crash_times.len(),
                        "capture is crash-looping, marking degraded"
                    );
                }
            }

            self.set_state(SupervisorState::Crashed);
            {
                let mut status = self.status.lock();
                status.restarts += 1;
            }
            debug!(device = %self.device.id, ?backoff, "waiting before restart");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.cancel.cancelled() => {
                    self.set_state(SupervisorState::Stopped);
                    return;
                }
            }
            backoff = (backoff * 2).min(cap);
        }
    }

    async fn start_capture(&self) -> Result<CaptureHandle> {
        let session = self.pool.acquire(&self.device).await?;
        let stream_url = session.handle().stream_url();
        let segment_seconds = self
            .device
            .segment_seconds
            .unwrap_or(self.config.segment_seconds);
        self.launcher
            .launch(&self.device.id, &stream_url, segment_seconds)
            .await
    }

    /// Pump capture events until the process exits or a stop is
    /// requested.
    async fn consume(&self, handle: &mut CaptureHandle) -> RunEnd {
        loop {
            tokio::select! {
                event = handle.next_event() => match event {
                    Some(CaptureEvent::Producing) => {
                        self.set_state(SupervisorState::Recording);
                        info!(device = %self.device.id, "recording");
                    }
                    Some(CaptureEvent::Finalized(segment)) => {
                        self.hand_off(segment).await;
                    }
                    Some(CaptureEvent::Exited { error }) => {
                        warn!(device = %self.device.id, ?error, "capture exited unexpectedly");
                        return RunEnd::Crashed;
                    }
                    None => {
                        warn!(device = %self.device.id, "capture event stream closed");
                        return RunEnd::Crashed;
                    }
                },
                _ = self.cancel.cancelled() => {
                    handle.begin_stop();
                    self.drain_stop(handle).await;
                    return RunEnd::Stopped;
                }
            }
        }
    }

    /// After a stop request, keep accepting finalized segments until
    /// the capture confirms its exit. The capture layer enforces the
    /// stop grace itself; the margin here only covers a wedged watcher.
    async fn drain_stop(&self, handle: &mut CaptureHandle) {
        let deadline = Duration::from_secs(self.config.stop_grace_seconds + 5);
        loop {
            match tokio::time::timeout(deadline, handle.next_event()).await {
                Ok(Some(CaptureEvent::Finalized(segment))) => self.hand_off(segment).await,
                Ok(Some(CaptureEvent::Producing)) => {}
                Ok(Some(CaptureEvent::Exited { .. })) | Ok(None) => return,
                Err(_) => {
                    warn!(device = %self.device.id, "capture did not confirm stop in time");
                    return;
                }
            }
        }
    }

    async fn hand_off(&self, finalized: FinalizedSegment) {
        let segment = RecordingSegment::new(
            self.device.id.clone(),
            finalized.path,
            finalized.started_at,
            finalized.ended_at,
        );
        if let Err(e) = self.segments.upsert(segment.clone()).await {
            error!(device = %self.device.id, error = %e, "failed to persist segment");
        }
        if let Err(e) = self.uploads.enqueue(segment).await {
            error!(device = %self.device.id, error = %e, "failed to enqueue segment");
        }
    }

    fn set_state(&self, state: SupervisorState) {
        self.status.lock().state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, SuspensionConfig, UploadConfig};
    use crate::models::SegmentStatus;
    use crate::repository::MemorySegmentStore;
    use crate::session::SuspensionGuard;
    use crate::storage::MockRemoteStorage;
    use crate::test_helpers::{device_record, FakeDeviceClient};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    /// Hands each created capture channel back to the test so it can
    /// drive events directly.
    struct FakeLauncher {
        handles: mpsc::UnboundedSender<(mpsc::Sender<CaptureEvent>, CancellationToken)>,
        launch_times: Arc<parking_lot::Mutex<Vec<Instant>>>,
    }

    impl FakeLauncher {
        fn new() -> (
            Arc<Self>,
            mpsc::UnboundedReceiver<(mpsc::Sender<CaptureEvent>, CancellationToken)>,
            Arc<parking_lot::Mutex<Vec<Instant>>>,
        ) {
            let (tx, rx) = mpsc::unbounded_channel();
            let launch_times = Arc::new(parking_lot::Mutex::new(Vec::new()));
            let launcher = Arc::new(Self {
                handles: tx,
                launch_times: launch_times.clone(),
            });
            (launcher, rx, launch_times)
        }
    }

    #[async_trait]
    impl CaptureLauncher for FakeLauncher {
        async fn launch(
            &self,
            _device_id: &DeviceId,
            _stream_url: &str,
            _segment_seconds: u64,
        ) -> Result<CaptureHandle> {
            let (tx, rx) = mpsc::channel(32);
            let stop = CancellationToken::new();
            self.launch_times.lock().push(Instant::now());
            let _ = self.handles.send((tx, stop.clone()));
            Ok(CaptureHandle::new(rx, stop))
        }
    }

    fn manager(
        launcher: Arc<dyn CaptureLauncher>,
        store: Arc<MemorySegmentStore>,
    ) -> RecordingManager {
        let client = Arc::new(FakeDeviceClient::new());
        let guard = Arc::new(SuspensionGuard::new(&SuspensionConfig::default()));
        let pool = Arc::new(SessionPool::new(client, guard, &SessionConfig::default()));
        let mut storage = MockRemoteStorage::new();
        storage
            .expect_upload()
            .returning(|_, target| Ok(target.to_string()));
        let uploads = UploadQueue::new(Arc::new(storage), store.clone(), &UploadConfig::default());
        RecordingManager::new(
            pool,
            launcher,
            store,
            uploads,
            &RecordingConfig::default(),
            true,
        )
    }

    fn finalized(hour: u32) -> FinalizedSegment {
        FinalizedSegment {
            path: PathBuf::from(format!("/tmp/{hour}.mp4")),
            started_at: Utc.with_ymd_and_hms(2026, 2, 27, hour, 0, 0).unwrap(),
            ended_at: Utc.with_ymd_and_hms(2026, 2, 27, hour, 5, 0).unwrap(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_restarts_back_off_exponentially() {
        let (launcher, mut handles, times) = FakeLauncher::new();
        let store = Arc::new(MemorySegmentStore::new());
        let manager = manager(launcher, store);
        let device = device_record("cam1");
        manager.enable(&device).unwrap();

        for _ in 0..3 {
            let (tx, _stop) = handles.recv().await.unwrap();
            tx.send(CaptureEvent::Producing).await.unwrap();
            tx.send(CaptureEvent::Exited {
                error: Some("stream reset".to_string()),
            })
            .await
            .unwrap();
        }
        // Fourth launch happens after the third backoff
        let _ = handles.recv().await.unwrap();

        let times = times.lock();
        let delays: Vec<u64> = times
            .windows(2)
            .map(|w| w[1].duration_since(w[0]).as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20]);

        // Three crashes inside the burst window
        let status = manager.status(&device.id).unwrap();
        assert!(status.degraded);
        assert_eq!(status.restarts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_persists_final_segments() {
        let (launcher, mut handles, _) = FakeLauncher::new();
        let store = Arc::new(MemorySegmentStore::new());
        let manager = Arc::new(manager(launcher, store.clone()));
        let device = device_record("cam1");
        manager.enable(&device).unwrap();

        let (tx, stop) = handles.recv().await.unwrap();
        tx.send(CaptureEvent::Producing).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(
            manager.status(&device.id).unwrap().state,
            SupervisorState::Recording
        );

        // The capture delivers its last segment only after the stop
        // request reaches it.
        let driver = tokio::spawn(async move {
            stop.cancelled().await;
            tx.send(CaptureEvent::Finalized(finalized(14))).await.unwrap();
            tx.send(CaptureEvent::Exited { error: None }).await.unwrap();
        });

        manager.disable(&device.id).await;
        driver.await.unwrap();

        assert!(manager.status(&device.id).is_none());
        let segments = store.list_device(&device.id).await.unwrap();
        assert_eq!(segments.len(), 1);
        assert_ne!(segments[0].status, SegmentStatus::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalized_segments_flow_to_upload_queue() {
        let (launcher, mut handles, _) = FakeLauncher::new();
        let store = Arc::new(MemorySegmentStore::new());
        let manager = manager(launcher, store.clone());
        let device = device_record("cam1");
        manager.enable(&device).unwrap();

        let (tx, _stop) = handles.recv().await.unwrap();
        tx.send(CaptureEvent::Producing).await.unwrap();
        tx.send(CaptureEvent::Finalized(finalized(14))).await.unwrap();
        tx.send(CaptureEvent::Finalized(finalized(15))).await.unwrap();

        // Let the supervisor and upload worker run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let segments = store.list_device(&device.id).await.unwrap();
        assert_eq!(segments.len(), 2);
        for segment in segments {
            assert_eq!(segment.status, SegmentStatus::Uploaded);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_rejects_bad_configuration() {
        let (launcher, _handles, _) = FakeLauncher::new();
        let store = Arc::new(MemorySegmentStore::new());
        let manager = manager(launcher.clone(), store.clone());

        let mut unrecordable = device_record("cam1");
        unrecordable.recordable = false;
        assert!(matches!(
            manager.enable(&unrecordable),
            Err(Error::InvalidInput(_))
        ));

        let mut no_creds = device_record("cam2");
        no_creds.credentials.username = String::new();
        no_creds.credentials.password = String::new();
        assert!(matches!(manager.enable(&no_creds), Err(Error::Config(_))));

        // Missing storage target is fatal at enable time
        let client = Arc::new(FakeDeviceClient::new());
        let guard = Arc::new(SuspensionGuard::new(&SuspensionConfig::default()));
        let pool = Arc::new(SessionPool::new(client, guard, &SessionConfig::default()));
        let uploads = UploadQueue::new(
            Arc::new(MockRemoteStorage::new()),
            store.clone(),
            &UploadConfig::default(),
        );
        let unconfigured = RecordingManager::new(
            pool,
            launcher,
            store,
            uploads,
            &RecordingConfig::default(),
            false,
        );
        assert!(matches!(
            unconfigured.enable(&device_record("cam3")),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_is_idempotent() {
        let (launcher, mut handles, _) = FakeLauncher::new();
        let store = Arc::new(MemorySegmentStore::new());
        let manager = manager(launcher, store);
        let device = device_record("cam1");

        manager.enable(&device).unwrap();
        manager.enable(&device).unwrap();
        let _ = handles.recv().await.unwrap();
        // No second supervisor means no second launch
        assert!(handles.try_recv().is_err());
    }
}
