//! S3-compatible backend for durable segment copies, via OpenDAL.
//!
//! Works against AWS S3, MinIO, and any other S3-compatible endpoint.
//! Object keys mirror the logical target layout, so the remote id and
//! the target key are the same string.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use futures::TryStreamExt;
use opendal::{services::S3, Operator};
use std::path::Path;
use tracing::{debug, warn};

use super::{RemoteEntry, RemoteStorage};
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::models::DeviceId;

pub struct OpendalStorage {
    operator: Operator,
}

impl OpendalStorage {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let mut builder = S3::default()
            .bucket(&config.bucket)
            .access_key_id(&config.access_key_id)
            .secret_access_key(&config.secret_access_key);
        if !config.endpoint.is_empty() {
            builder = builder.endpoint(&config.endpoint);
        }
        if !config.region.is_empty() {
            builder = builder.region(&config.region);
        }
        if !config.root.is_empty() {
            builder = builder.root(&config.root);
        }

        let operator = Operator::new(builder)
            .map_err(|e| Error::Storage(format!("object storage init failed: {e}")))?
            .finish();

        Ok(Self { operator })
    }
}

#[async_trait]
impl RemoteStorage for OpendalStorage {
    async fn upload(&self, local_path: &Path, target: &str) -> Result<String> {
        let bytes = tokio::fs::read(local_path).await?;
        let size = bytes.len();
        self.operator
            .write(target, bytes)
            .await
            .map_err(|e| Error::Upload(format!("write {target} failed: {e}")))?;
        debug!(target, size, "segment uploaded");
        Ok(target.to_string())
    }

    async fn list(&self, device_id: &DeviceId) -> Result<Vec<RemoteEntry>> {
        let prefix = format!("{device_id}/");
        let mut lister = self
            .operator
            .lister_with(&prefix)
            .recursive(true)
            .await
            .map_err(|e| Error::Storage(format!("list {prefix} failed: {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = lister
            .try_next()
            .await
            .map_err(|e| Error::Storage(format!("list {prefix} failed: {e}")))?
        {
            let path = entry.path();
            if path.ends_with('/') {
                continue;
            }
            match parse_target(path) {
                Some(started_at) => entries.push(RemoteEntry {
                    remote_id: path.to_string(),
                    target: path.to_string(),
                    started_at,
                }),
                // Foreign objects under our prefix are left alone
                None => warn!(path, "unrecognized object key, skipping"),
            }
        }
        entries.sort_by_key(|e| e.started_at);
        Ok(entries)
    }

    async fn delete(&self, remote_id: &str) -> Result<()> {
        self.operator
            .delete(remote_id)
            .await
            .map_err(|e| Error::Storage(format!("delete {remote_id} failed: {e}")))?;
        debug!(remote_id, "remote segment deleted");
        Ok(())
    }
}

/// Recover the segment start time from a `{device}/{date}/{time}.mp4` key.
fn parse_target(key: &str) -> Option<chrono::DateTime<Utc>> {
    let mut parts = key.rsplitn(3, '/');
    let file = parts.next()?;
    let date = parts.next()?;
    parts.next()?; // device component must exist

    let time = file.strip_suffix(".mp4")?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H-%M-%S").ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}
