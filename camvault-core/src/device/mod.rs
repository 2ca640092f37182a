//! Device protocol seam.
//!
//! The core never talks a camera protocol directly; everything goes
//! through [`DeviceClient`] and [`DeviceHandle`]. A connection failure is
//! classified at this boundary: `AuthRejected` feeds suspension
//! accounting, `Unreachable` never does.

pub mod onvif;

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{Credentials, PtzCommand};

pub use onvif::OnvifDeviceClient;

/// Errors surfaced by a device protocol client
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    #[error("authentication rejected by device")]
    AuthRejected,

    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Opens authenticated sessions against a camera.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn DeviceHandle>, DeviceError>;
}

/// An authenticated client handle for a single camera.
///
/// Handles are owned by the session pool and handed out through
/// [`crate::session::Session`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Execute a relative pan/tilt command.
    async fn ptz(&self, command: PtzCommand) -> Result<(), DeviceError>;

    /// RTSP URL of the device's main stream.
    fn stream_url(&self) -> String;

    /// Release the device-side login slot. Best effort.
    async fn disconnect(&self);
}
