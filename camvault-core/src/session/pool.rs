//! Session pool with TTL and single-flight acquisition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::singleflight::{SingleFlight, SingleFlightError};
use super::suspension::SuspensionGuard;
use super::SessionError;
use crate::config::SessionConfig;
use crate::device::{DeviceClient, DeviceError, DeviceHandle};
use crate::models::{DeviceId, DeviceRecord};

/// An authenticated device session handed out by the pool.
///
/// Cheap to clone; all clones share the underlying client handle and
/// validity flag, so `mark_invalid` on any clone is seen by the pool.
#[derive(Clone)]
pub struct Session {
    device_id: DeviceId,
    handle: Arc<dyn DeviceHandle>,
    created_at: Instant,
    valid: Arc<AtomicBool>,
}

impl Session {
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    #[must_use]
    pub fn handle(&self) -> &dyn DeviceHandle {
        self.handle.as_ref()
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark the session as gone bad mid-use (e.g. a command came back
    /// with an auth-style rejection). The next `acquire` re-authenticates.
    pub fn mark_invalid(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

// Hand-written: the handle is not `Debug`, and nothing derived from
// credentials belongs in log output.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device_id", &self.device_id)
            .field("created_at", &self.created_at)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

struct Entry {
    session: Session,
    expires_at: Instant,
}

/// Caches at most one valid session per device.
///
/// Fast path returns the cached session without any network traffic.
/// The slow path is single-flight per device and consults the
/// [`SuspensionGuard`] before contacting the camera.
pub struct SessionPool {
    client: Arc<dyn DeviceClient>,
    guard: Arc<SuspensionGuard>,
    sessions: DashMap<DeviceId, Entry>,
    flight: SingleFlight<DeviceId, Session, SessionError>,
    ttl: Duration,
    sliding_ttl: bool,
    sweep_interval: Duration,
}

impl SessionPool {
    #[must_use]
    pub fn new(
        client: Arc<dyn DeviceClient>,
        guard: Arc<SuspensionGuard>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            client,
            guard,
            sessions: DashMap::new(),
            flight: SingleFlight::new(),
            ttl: Duration::from_secs(config.ttl_seconds),
            sliding_ttl: config.sliding_ttl,
            sweep_interval: Duration::from_secs(config.sweep_interval_seconds),
        }
    }

    /// Acquire a session for the device, reusing the cached one when
    /// valid and unexpired.
    pub async fn acquire(&self, device: &DeviceRecord) -> Result<Session, SessionError> {
        if let Some(session) = self.cached(&device.id) {
            return Ok(session);
        }

        let result = self
            .flight
            .run(device.id.clone(), self.acquire_slow(device))
            .await;
        match result {
            Ok(session) => Ok(session),
            Err(SingleFlightError::Inner(err)) => Err(err),
            Err(SingleFlightError::LeaderFailed) => Err(SessionError::Internal(
                "session acquisition leader dropped".to_string(),
            )),
        }
    }

    /// Drop the cached session and close its device-side login so the
    /// next `acquire` re-authenticates. Does not clear an active
    /// suspension.
    pub fn invalidate(&self, device_id: &DeviceId) {
        if let Some((_, entry)) = self.sessions.remove(device_id) {
            entry.session.mark_invalid();
            Self::disconnect_later(entry.session);
            debug!(device = %device_id, "session invalidated");
        }
    }

    /// Evict and disconnect sessions past their expiry, releasing
    /// device-side login slots ahead of need. Returns the eviction count.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<DeviceId> = self
            .sessions
            .iter()
            .filter(|e| now >= e.expires_at || !e.session.is_valid())
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = 0;
        for device_id in expired {
            if let Some((_, entry)) = self.sessions.remove(&device_id) {
                entry.session.handle().disconnect().await;
                evicted += 1;
                debug!(device = %device_id, "expired session evicted");
            }
        }
        evicted
    }

    /// Spawn the background expiry sweep.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = pool.evict_expired().await;
                if evicted > 0 {
                    debug!(evicted, "session sweep complete");
                }
            }
        })
    }

    fn cached(&self, device_id: &DeviceId) -> Option<Session> {
        let now = Instant::now();
        let mut stale = false;
        let session = {
            let mut entry = self.sessions.get_mut(device_id)?;
            if !entry.session.is_valid() || now >= entry.expires_at {
                stale = true;
                None
            } else {
                if self.sliding_ttl {
                    entry.expires_at = now + self.ttl;
                }
                Some(entry.session.clone())
            }
        };
        if stale {
            // The removed entry is invisible to the sweep, so its login
            // slot must be released here.
            if let Some((_, entry)) = self.sessions.remove(device_id) {
                Self::disconnect_later(entry.session);
            }
        }
        session
    }

    /// Close the device-side login in the background; both removal
    /// paths are synchronous.
    fn disconnect_later(session: Session) {
        tokio::spawn(async move {
            session.handle.disconnect().await;
        });
    }

    async fn acquire_slow(&self, device: &DeviceRecord) -> Result<Session, SessionError> {
        // Late joiners may arrive just after the previous leader cached
        // a session; re-check before doing network work.
        if let Some(session) = self.cached(&device.id) {
            return Ok(session);
        }

        if let Err(remaining) = self.guard.check(&device.id) {
            return Err(SessionError::Suspended { remaining });
        }

        match self
            .client
            .connect(&device.address, &device.credentials)
            .await
        {
            Ok(handle) => {
                self.guard.record_success(&device.id);
                let now = Instant::now();
                let session = Session {
                    device_id: device.id.clone(),
                    handle,
                    created_at: now,
                    valid: Arc::new(AtomicBool::new(true)),
                };
                self.sessions.insert(
                    device.id.clone(),
                    Entry {
                        session: session.clone(),
                        expires_at: now + self.ttl,
                    },
                );
                info!(device = %device.id, ttl_secs = self.ttl.as_secs(), "session established");
                Ok(session)
            }
            Err(DeviceError::AuthRejected) => {
                self.guard.record_failure(&device.id);
                Err(SessionError::AuthRejected(format!(
                    "device {} rejected credentials",
                    device.id
                )))
            }
            // Not evidence of a bad credential; must not count toward lockout.
            Err(DeviceError::Unreachable(msg)) | Err(DeviceError::Protocol(msg)) => {
                Err(SessionError::Transient(msg))
            }
        }
    }
}
