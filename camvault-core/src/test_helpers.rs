//! Shared fakes for tests that need scripted device behavior or
//! timing the mock crates cannot express.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::device::{DeviceClient, DeviceError, DeviceHandle};
use crate::models::{Credentials, DeviceId, DeviceRecord, PtzCommand};

/// A device record pointing at nothing in particular.
pub fn device_record(id: &str) -> DeviceRecord {
    DeviceRecord {
        id: DeviceId::from(id),
        name: format!("camera {id}"),
        address: format!("10.0.0.{}", id.len()),
        credentials: Credentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
        },
        controllable: true,
        recordable: true,
        enabled: true,
        segment_seconds: None,
    }
}

/// Scriptable [`DeviceClient`] that counts connects and can fail the
/// next N attempts with a given error.
pub struct FakeDeviceClient {
    connects: AtomicU32,
    disconnects: Arc<AtomicU32>,
    delay: Duration,
    failures: Mutex<VecDeque<DeviceError>>,
    ptz_log: Arc<Mutex<Vec<(DeviceId, PtzCommand)>>>,
    ptz_delay: Duration,
    ptz_failures: Mutex<VecDeque<DeviceError>>,
}

impl FakeDeviceClient {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            connects: AtomicU32::new(0),
            disconnects: Arc::new(AtomicU32::new(0)),
            delay,
            failures: Mutex::new(VecDeque::new()),
            ptz_log: Arc::new(Mutex::new(Vec::new())),
            ptz_delay: Duration::ZERO,
            ptz_failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_ptz_delay(delay: Duration) -> Self {
        let mut fake = Self::new();
        fake.ptz_delay = delay;
        fake
    }

    pub fn fail_next_connects(&self, error: DeviceError, count: usize) {
        let mut failures = self.failures.lock();
        for _ in 0..count {
            failures.push_back(error.clone());
        }
    }

    pub fn fail_next_ptz(&self, error: DeviceError) {
        self.ptz_failures.lock().push_back(error);
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn ptz_log(&self) -> Vec<(DeviceId, PtzCommand)> {
        self.ptz_log.lock().clone()
    }
}

impl Default for FakeDeviceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceClient for FakeDeviceClient {
    async fn connect(
        &self,
        address: &str,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn DeviceHandle>, DeviceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        Ok(Arc::new(FakeHandle {
            device_id: DeviceId::from(address),
            stream_url: format!("rtsp://{address}:554/stream1"),
            disconnects: self.disconnects.clone(),
            ptz_log: self.ptz_log.clone(),
            ptz_delay: self.ptz_delay,
            ptz_failure: Mutex::new(self.ptz_failures.lock().pop_front()),
        }))
    }
}

pub struct FakeHandle {
    device_id: DeviceId,
    stream_url: String,
    disconnects: Arc<AtomicU32>,
    ptz_log: Arc<Mutex<Vec<(DeviceId, PtzCommand)>>>,
    ptz_delay: Duration,
    ptz_failure: Mutex<Option<DeviceError>>,
}

#[async_trait]
impl DeviceHandle for FakeHandle {
    async fn ptz(&self, command: PtzCommand) -> Result<(), DeviceError> {
        if !self.ptz_delay.is_zero() {
            tokio::time::sleep(self.ptz_delay).await;
        }
        if let Some(error) = self.ptz_failure.lock().take() {
            return Err(error);
        }
        self.ptz_log.lock().push((self.device_id.clone(), command));
        Ok(())
    }

    fn stream_url(&self) -> String {
        self.stream_url.clone()
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
