//! Stream gateway registration.
//!
//! Browsers never speak RTSP; a go2rtc-compatible gateway restreams
//! each camera over WebSocket/HLS. This module keeps the gateway's
//! stream table in sync with the device roster and hands out the
//! browser-facing URLs.

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::device::onvif::rtsp_url;
use crate::error::{Error, Result};
use crate::models::DeviceRecord;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Browser-consumable URLs for one registered stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamUrls {
    pub webrtc_url: String,
    pub mse_url: String,
    pub hls_url: String,
}

pub struct StreamGateway {
    http: reqwest::Client,
    base_url: String,
}

impl StreamGateway {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn stream_name(device: &DeviceRecord) -> String {
        format!("camera_{}", device.id)
    }

    /// Register (or re-register) a device's sources with the gateway.
    ///
    /// PUT replaces the full source list, so one call covers both the
    /// RTSP stream and, for controllable devices, the ONVIF source.
    pub async fn register(&self, device: &DeviceRecord) -> Result<()> {
        let name = Self::stream_name(device);
        let mut query: Vec<(&str, String)> = vec![("name", name.clone())];
        query.push(("src", rtsp_url(&device.address, &device.credentials)));
        if device.controllable {
            let user = utf8_percent_encode(&device.credentials.username, NON_ALPHANUMERIC);
            let pass = utf8_percent_encode(&device.credentials.password, NON_ALPHANUMERIC);
            query.push((
                "src",
                format!("onvif://{user}:{pass}@{}:2020", device.address),
            ));
        }

        let response = self
            .http
            .put(format!("{}/api/streams", self.base_url))
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("register {name}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Gateway(format!(
                "register {name}: gateway returned {}",
                response.status()
            )));
        }
        info!(device = %device.id, stream = %name, "stream registered with gateway");
        Ok(())
    }

    /// Remove a device's stream. An already-absent stream is fine.
    pub async fn unregister(&self, device: &DeviceRecord) -> Result<()> {
        let name = Self::stream_name(device);
        let result = self
            .http
            .delete(format!("{}/api/streams", self.base_url))
            .query(&[("name", name.as_str())])
            .send()
            .await;
        if let Err(e) = result {
            warn!(device = %device.id, error = %e, "stream unregister failed");
        }
        Ok(())
    }

    /// URLs a browser can consume for the device's live stream.
    #[must_use]
    pub fn stream_urls(&self, device: &DeviceRecord) -> StreamUrls {
        let name = Self::stream_name(device);
        let ws_base = self
            .base_url
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1);
        StreamUrls {
            webrtc_url: format!("{ws_base}/api/ws?src={name}"),
            mse_url: format!("{ws_base}/api/ws?src={name}"),
            hls_url: format!("{}/api/stream.m3u8?src={name}", self.base_url),
        }
    }
}
