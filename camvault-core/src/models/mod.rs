pub mod device;
pub mod id;
pub mod segment;

pub use device::{Credentials, DeviceRecord, PtzCommand};
pub use id::{DeviceId, SegmentId};
pub use segment::{remote_target, RecordingSegment, SegmentStatus};
