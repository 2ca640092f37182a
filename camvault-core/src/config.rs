use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::DeviceRecord;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub suspension: SuspensionConfig,
    pub recording: RecordingConfig,
    pub upload: UploadConfig,
    pub retention: RetentionConfig,
    pub storage: StorageConfig,
    pub gateway: GatewayConfig,
    /// Devices seeded into the record store at startup
    pub devices: Vec<DeviceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session lifetime in seconds, fixed from creation
    pub ttl_seconds: u64,
    /// Reset the TTL on each cache hit instead of fixing it at creation.
    /// Fixed-from-creation bounds credential exposure; sliding maximizes reuse.
    pub sliding_ttl: bool,
    /// Interval of the background sweep that evicts expired sessions
    pub sweep_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            sliding_ttl: false,
            sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuspensionConfig {
    /// Sliding window over which authentication failures are counted
    pub window_seconds: u64,
    /// Failures within the window that trigger a lockout
    pub failure_threshold: u32,
    /// Lockout duration once the threshold is reached
    pub lockout_seconds: u64,
}

impl Default for SuspensionConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            failure_threshold: 5,
            lockout_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Root directory for local segment files
    pub local_path: String,
    /// Segment rotation interval
    pub segment_seconds: u64,
    /// Bounded wait for the in-flight segment to finalize on disable
    pub stop_grace_seconds: u64,
    /// Base delay before restarting a crashed capture process
    pub restart_backoff_base_seconds: u64,
    /// Cap on the exponential restart delay
    pub restart_backoff_cap_seconds: u64,
    /// Healthy run length after which the restart delay resets to base
    pub healthy_reset_seconds: u64,
    /// Crashes within `crash_burst_window_seconds` that mark the device degraded
    pub crash_burst_threshold: u32,
    pub crash_burst_window_seconds: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            local_path: "/var/lib/camvault/recordings".to_string(),
            segment_seconds: 300,
            stop_grace_seconds: 10,
            restart_backoff_base_seconds: 5,
            restart_backoff_cap_seconds: 60,
            healthy_reset_seconds: 300,
            crash_burst_threshold: 3,
            crash_burst_window_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum upload attempts per segment before it is marked failed
    pub max_attempts: u32,
    /// Base delay between retries of one segment
    pub retry_base_seconds: u64,
    /// Cap on the exponential retry delay
    pub retry_cap_seconds: u64,
    /// Global cap on concurrent uploads across all devices
    pub max_concurrent_uploads: usize,
    /// Per-attempt network timeout
    pub attempt_timeout_seconds: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base_seconds: 5,
            retry_cap_seconds: 300,
            max_concurrent_uploads: 4,
            attempt_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Age after which remote segments are deleted
    pub remote_days: i64,
    /// Age after which uploaded local copies are deleted (shorter window,
    /// kept for quick local access after upload)
    pub local_days: i64,
    /// Interval between reconciliation sweeps
    pub sweep_interval_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            remote_days: 30,
            local_days: 2,
            sweep_interval_seconds: 86_400,
        }
    }
}

/// S3-compatible object storage target for durable segment copies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Key prefix inside the bucket
    pub root: String,
}

impl StorageConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.bucket.is_empty()
    }
}

/// External streaming gateway (go2rtc-compatible API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:1984".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("CAMVAULT").separator("__"))
            .build()?;
        builder.try_deserialize()
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let builder = ConfigBuilder::builder()
            .add_source(Environment::with_prefix("CAMVAULT").separator("__"))
            .build()?;
        builder.try_deserialize()
    }

    /// Validate the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.session.ttl_seconds == 0 {
            errors.push("session.ttl_seconds must be positive".to_string());
        }
        if self.suspension.failure_threshold == 0 {
            errors.push("suspension.failure_threshold must be positive".to_string());
        }
        if self.recording.segment_seconds == 0 {
            errors.push("recording.segment_seconds must be positive".to_string());
        }
        if self.upload.max_attempts == 0 {
            errors.push("upload.max_attempts must be positive".to_string());
        }
        if self.upload.max_concurrent_uploads == 0 {
            errors.push("upload.max_concurrent_uploads must be positive".to_string());
        }
        if self.retention.local_days > self.retention.remote_days {
            errors.push(format!(
                "retention.local_days ({}) must not exceed retention.remote_days ({})",
                self.retention.local_days, self.retention.remote_days
            ));
        }
        for device in &self.devices {
            if device.address.is_empty() {
                errors.push(format!("device {} has no address", device.id));
            }
            if device.credentials.is_empty() {
                errors.push(format!("device {} has empty credentials", device.id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
