use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeviceId, SegmentId};
use crate::error::{Error, Result};

/// Lifecycle of a recording segment.
///
/// Statuses only move forward, with one exception: `UploadFailed` may
/// return to `PendingUpload` when a retry is scheduled. Nothing ever
/// regresses past `Uploaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Recording,
    Finalized,
    PendingUpload,
    Uploaded,
    UploadFailed,
    Deleted,
}

impl SegmentStatus {
    /// Whether a transition from `self` to `next` is permitted.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        use SegmentStatus::{Deleted, Finalized, PendingUpload, Recording, UploadFailed, Uploaded};
        matches!(
            (self, next),
            (Recording, Finalized)
                | (Finalized, PendingUpload)
                | (PendingUpload, Uploaded)
                | (PendingUpload, UploadFailed)
                | (UploadFailed, PendingUpload)
                | (Uploaded, Deleted)
        )
    }
}

impl std::fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Recording => "recording",
            Self::Finalized => "finalized",
            Self::PendingUpload => "pending_upload",
            Self::Uploaded => "uploaded",
            Self::UploadFailed => "upload_failed",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// A bounded-duration slice of continuous recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSegment {
    pub id: SegmentId,
    pub device_id: DeviceId,
    /// Local file path; cleared once the file is deleted
    pub local_path: Option<PathBuf>,
    /// Remote object id; set once the upload is confirmed
    pub remote_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: SegmentStatus,
}

impl RecordingSegment {
    #[must_use]
    pub fn new(
        device_id: DeviceId,
        local_path: PathBuf,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SegmentId::new(),
            device_id,
            local_path: Some(local_path),
            remote_id: None,
            started_at,
            ended_at,
            status: SegmentStatus::Finalized,
        }
    }

    /// Advance the status, enforcing the forward-only rule.
    pub fn advance(&mut self, next: SegmentStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(Error::InvalidTransition(format!(
                "segment {}: {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Deterministic remote target for this segment.
    ///
    /// Derived only from (device id, start time) so a retried upload
    /// always lands on the same logical object.
    #[must_use]
    pub fn remote_target(&self) -> String {
        remote_target(&self.device_id, self.started_at)
    }
}

/// Remote object key for a segment: `{device}/{YYYY-MM-DD}/{HH-MM-SS}.mp4`
#[must_use]
pub fn remote_target(device_id: &DeviceId, started_at: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{}.mp4",
        device_id,
        started_at.format("%Y-%m-%d"),
        started_at.format("%H-%M-%S"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn segment() -> RecordingSegment {
        RecordingSegment::new(
            DeviceId::from("cam1"),
            PathBuf::from("/tmp/x.mp4"),
            Utc.with_ymd_and_hms(2026, 2, 27, 14, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 27, 14, 5, 0).unwrap(),
        )
    }

    #[test]
    fn test_forward_transitions() {
        let mut seg = segment();
        assert_eq!(seg.status, SegmentStatus::Finalized);
        seg.advance(SegmentStatus::PendingUpload).unwrap();
        seg.advance(SegmentStatus::Uploaded).unwrap();
        seg.advance(SegmentStatus::Deleted).unwrap();
    }

    #[test]
    fn test_upload_failed_may_retry() {
        let mut seg = segment();
        seg.advance(SegmentStatus::PendingUpload).unwrap();
        seg.advance(SegmentStatus::UploadFailed).unwrap();
        seg.advance(SegmentStatus::PendingUpload).unwrap();
        seg.advance(SegmentStatus::Uploaded).unwrap();
    }

    #[test]
    fn test_no_regression_past_uploaded() {
        let mut seg = segment();
        seg.advance(SegmentStatus::PendingUpload).unwrap();
        seg.advance(SegmentStatus::Uploaded).unwrap();
        assert!(seg.advance(SegmentStatus::PendingUpload).is_err());
        assert!(seg.advance(SegmentStatus::UploadFailed).is_err());
        assert!(seg.advance(SegmentStatus::Finalized).is_err());
    }

    #[test]
    fn test_remote_target_is_deterministic() {
        let seg = segment();
        assert_eq!(seg.remote_target(), "cam1/2026-02-27/14-00-00.mp4");
        assert_eq!(seg.remote_target(), segment().remote_target());
    }
}
