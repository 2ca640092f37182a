//! Strictly serialized per-device control commands.
//!
//! Two interleaved motor moves can corrupt a camera's physical
//! positioning state, so commands for one device queue FIFO behind each
//! other. Commands for different devices proceed fully in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::device::DeviceError;
use crate::error::{Error, Result};
use crate::models::{DeviceId, DeviceRecord, PtzCommand};
use crate::session::SessionPool;

pub struct ControlSerializer {
    pool: Arc<SessionPool>,
    locks: DashMap<DeviceId, Arc<Mutex<()>>>,
}

impl ControlSerializer {
    #[must_use]
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self {
            pool,
            locks: DashMap::new(),
        }
    }

    /// Execute a control command against the device.
    ///
    /// No automatic retry: a retried move would double-displace the
    /// camera, so transient failures surface to the caller.
    pub async fn submit(&self, device: &DeviceRecord, command: PtzCommand) -> Result<()> {
        if !device.controllable {
            return Err(Error::InvalidInput(format!(
                "device {} does not support control",
                device.id
            )));
        }

        let lock = self.lock_for(&device.id);
        let _guard = lock.lock().await;

        let session = self.pool.acquire(device).await?;
        match session.handle().ptz(command).await {
            Ok(()) => {
                debug!(device = %device.id, ?command, "control command executed");
                Ok(())
            }
            Err(DeviceError::AuthRejected) => {
                // The session went bad mid-use; the next acquire
                // re-enters the slow path.
                session.mark_invalid();
                self.pool.invalidate(&device.id);
                Err(Error::AuthRejected(format!(
                    "device {} rejected command authentication",
                    device.id
                )))
            }
            Err(DeviceError::Unreachable(msg)) | Err(DeviceError::Protocol(msg)) => {
                Err(Error::Transient(msg))
            }
        }
    }

    fn lock_for(&self, device_id: &DeviceId) -> Arc<Mutex<()>> {
        self.locks
            .entry(device_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
