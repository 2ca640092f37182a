//! Authenticated device session sharing.
//!
//! Cameras allow only a handful of concurrent logins and lock clients
//! out after rapid authentication failures, so sessions are a shared
//! resource: pooled, TTL-bounded, acquired single-flight, and guarded
//! by per-device suspension tracking.

pub mod pool;
pub mod singleflight;
pub mod suspension;

use std::time::Duration;

pub use pool::{Session, SessionPool};
pub use singleflight::{SingleFlight, SingleFlightError};
pub use suspension::SuspensionGuard;

/// Session acquisition errors.
///
/// `Clone` because a singleflight result is shared among every caller
/// that joined the in-flight acquisition.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("device suspended, retry in {}s", remaining.as_secs())]
    Suspended { remaining: Duration },

    #[error("device unreachable: {0}")]
    Transient(String),

    #[error("internal session error: {0}")]
    Internal(String),
}
