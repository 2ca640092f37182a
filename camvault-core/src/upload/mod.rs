//! Upload pipeline moving finalized segments to durable storage.

mod queue;

pub use queue::UploadQueue;
