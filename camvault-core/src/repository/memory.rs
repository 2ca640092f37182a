//! In-process record stores.
//!
//! Stand-ins for the external persistence layer: good enough for a
//! single-node deployment and for tests. Listings come back in a
//! stable order (device id, then segment start time).

use async_trait::async_trait;
use dashmap::DashMap;

use super::{DeviceStore, SegmentStore};
use crate::error::Result;
use crate::models::{DeviceId, DeviceRecord, RecordingSegment, SegmentId};

#[derive(Default)]
pub struct MemoryDeviceStore {
    devices: DashMap<DeviceId, DeviceRecord>,
}

impl MemoryDeviceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn get(&self, id: &DeviceId) -> Result<Option<DeviceRecord>> {
        Ok(self.devices.get(id).map(|e| e.value().clone()))
    }

    async fn list(&self) -> Result<Vec<DeviceRecord>> {
        let mut devices: Vec<DeviceRecord> =
            self.devices.iter().map(|e| e.value().clone()).collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    async fn upsert(&self, device: DeviceRecord) -> Result<()> {
        self.devices.insert(device.id.clone(), device);
        Ok(())
    }

    async fn delete(&self, id: &DeviceId) -> Result<()> {
        self.devices.remove(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySegmentStore {
    segments: DashMap<SegmentId, RecordingSegment>,
}

impl MemorySegmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SegmentStore for MemorySegmentStore {
    async fn get(&self, id: &SegmentId) -> Result<Option<RecordingSegment>> {
        Ok(self.segments.get(id).map(|e| e.value().clone()))
    }

    async fn list_device(&self, device_id: &DeviceId) -> Result<Vec<RecordingSegment>> {
        let mut segments: Vec<RecordingSegment> = self
            .segments
            .iter()
            .filter(|e| &e.value().device_id == device_id)
            .map(|e| e.value().clone())
            .collect();
        segments.sort_by_key(|s| s.started_at);
        Ok(segments)
    }

    async fn list(&self) -> Result<Vec<RecordingSegment>> {
        let mut segments: Vec<RecordingSegment> =
            self.segments.iter().map(|e| e.value().clone()).collect();
        segments.sort_by(|a, b| (&a.device_id, a.started_at).cmp(&(&b.device_id, b.started_at)));
        Ok(segments)
    }

    async fn upsert(&self, segment: RecordingSegment) -> Result<()> {
        self.segments.insert(segment.id.clone(), segment);
        Ok(())
    }

    async fn delete(&self, id: &SegmentId) -> Result<()> {
        self.segments.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_segment_listing_is_ordered_by_start_time() {
        let store = MemorySegmentStore::new();
        let device = DeviceId::from("cam1");

        for hour in [14, 12, 13] {
            let seg = RecordingSegment::new(
                device.clone(),
                PathBuf::from(format!("/tmp/{hour}.mp4")),
                Utc.with_ymd_and_hms(2026, 2, 27, hour, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 2, 27, hour, 5, 0).unwrap(),
            );
            store.upsert(seg).await.unwrap();
        }

        let listed = store.list_device(&device).await.unwrap();
        let hours: Vec<u32> = listed
            .iter()
            .map(|s| chrono::Timelike::hour(&s.started_at))
            .collect();
        assert_eq!(hours, vec![12, 13, 14]);
    }

    #[tokio::test]
    async fn test_device_upsert_replaces_existing() {
        let store = MemoryDeviceStore::new();
        let mut device = crate::test_helpers::device_record("cam1");
        store.upsert(device.clone()).await.unwrap();

        device.enabled = false;
        store.upsert(device.clone()).await.unwrap();

        let fetched = store.get(&device.id).await.unwrap().expect("present");
        assert!(!fetched.enabled);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
