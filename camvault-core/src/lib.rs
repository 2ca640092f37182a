//! Core library for camvault, a camera monitoring and recording
//! service.
//!
//! The pieces fit together as a pipeline: the [`session`] pool hands
//! out authenticated device sessions (guarded against credential
//! lockouts), [`control`] serializes pan/tilt commands per device,
//! [`recording`] supervises the capture process producing local
//! segments, [`upload`] moves finalized segments to durable storage in
//! chronological order, and [`retention`] reconciles both copies
//! against their retention windows.

pub mod bootstrap;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod recording;
pub mod repository;
pub mod retention;
pub mod session;
pub mod storage;
pub mod upload;

#[cfg(test)]
pub mod test_helpers;

pub use config::Config;
pub use error::{Error, Result};
