//! Durable object storage seam.
//!
//! Segment bytes leave the machine through [`RemoteStorage`]. The core
//! never assumes a particular backend; the stock implementation in
//! [`s3`] targets any S3-compatible endpoint through opendal.

pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

use crate::error::Result;
use crate::models::DeviceId;

pub use s3::OpendalStorage;

/// One stored segment object as seen by the remote backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Backend identifier, sufficient to delete the object
    pub remote_id: String,
    /// Logical target key, `{device}/{date}/{time}.mp4`
    pub target: String,
    /// Segment start time recovered from the key
    pub started_at: DateTime<Utc>,
}

/// Placeholder backend used when no object storage is configured.
///
/// Recording cannot be enabled without storage (checked at enable
/// time), but control and live streaming still work; any call that
/// does reach this backend fails with a configuration error.
pub struct DisabledStorage;

#[async_trait]
impl RemoteStorage for DisabledStorage {
    async fn upload(&self, _local_path: &Path, _target: &str) -> Result<String> {
        Err(crate::error::Error::Config(
            "object storage is not configured".to_string(),
        ))
    }

    async fn list(&self, _device_id: &DeviceId) -> Result<Vec<RemoteEntry>> {
        Ok(Vec::new())
    }

    async fn delete(&self, _remote_id: &str) -> Result<()> {
        Err(crate::error::Error::Config(
            "object storage is not configured".to_string(),
        ))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Upload a local file to the target key, returning the backend's
    /// identifier for the stored object. Uploading to an existing
    /// target overwrites it, which keeps retries idempotent.
    async fn upload(&self, local_path: &Path, target: &str) -> Result<String>;

    /// List every stored object for one device.
    async fn list(&self, device_id: &DeviceId) -> Result<Vec<RemoteEntry>>;

    /// Delete a stored object. Deleting an absent object is not an error.
    async fn delete(&self, remote_id: &str) -> Result<()>;
}
