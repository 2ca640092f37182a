//! Record store seam.
//!
//! Persistence of device and segment records belongs to an external
//! collaborator; the core only reads and writes whole records through
//! these traits and implements no query logic of its own.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{DeviceId, DeviceRecord, RecordingSegment, SegmentId};

pub use memory::{MemoryDeviceStore, MemorySegmentStore};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get(&self, id: &DeviceId) -> Result<Option<DeviceRecord>>;
    async fn list(&self) -> Result<Vec<DeviceRecord>>;
    async fn upsert(&self, device: DeviceRecord) -> Result<()>;
    async fn delete(&self, id: &DeviceId) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SegmentStore: Send + Sync {
    async fn get(&self, id: &SegmentId) -> Result<Option<RecordingSegment>>;
    async fn list_device(&self, device_id: &DeviceId) -> Result<Vec<RecordingSegment>>;
    async fn list(&self) -> Result<Vec<RecordingSegment>>;
    async fn upsert(&self, segment: RecordingSegment) -> Result<()>;
    async fn delete(&self, id: &SegmentId) -> Result<()>;
}
