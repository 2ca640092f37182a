//! Supervised per-device recording.
//!
//! Each recordable device gets one supervisor driving a capture
//! process through `Stopped -> Starting -> Recording`, with crash
//! recovery (`Recording -> Crashed -> Starting`) under exponential
//! backoff. Finalized segments are persisted and handed to the upload
//! pipeline.

pub mod capture;
mod supervisor;

pub use capture::{CaptureEvent, CaptureHandle, CaptureLauncher, FfmpegLauncher, FinalizedSegment};
pub use supervisor::{RecordingManager, RecordingStatus, SupervisorState};
