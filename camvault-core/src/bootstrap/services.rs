//! Service initialization and dependency injection

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    control::ControlSerializer,
    device::OnvifDeviceClient,
    gateway::StreamGateway,
    recording::{FfmpegLauncher, RecordingManager},
    repository::{DeviceStore, MemoryDeviceStore, MemorySegmentStore, SegmentStore},
    retention::RetentionSweeper,
    session::{SessionPool, SuspensionGuard},
    storage::{DisabledStorage, OpendalStorage, RemoteStorage},
    upload::UploadQueue,
    Config,
};

/// Container for all initialized services
#[derive(Clone)]
pub struct Services {
    pub devices: Arc<dyn DeviceStore>,
    pub segments: Arc<dyn SegmentStore>,
    pub pool: Arc<SessionPool>,
    pub control: Arc<ControlSerializer>,
    pub gateway: Arc<StreamGateway>,
    pub uploads: Arc<UploadQueue>,
    pub recording: Arc<RecordingManager>,
    pub retention: Arc<RetentionSweeper>,
}

/// Initialize all core services
pub async fn init_services(config: &Config) -> Result<Services, anyhow::Error> {
    info!("Initializing services...");

    let devices: Arc<dyn DeviceStore> = Arc::new(MemoryDeviceStore::new());
    let segments: Arc<dyn SegmentStore> = Arc::new(MemorySegmentStore::new());

    let guard = Arc::new(SuspensionGuard::new(&config.suspension));
    let client = Arc::new(OnvifDeviceClient::new());
    let pool = Arc::new(SessionPool::new(client, guard, &config.session));
    let control = Arc::new(ControlSerializer::new(pool.clone()));
    let gateway = Arc::new(StreamGateway::new(&config.gateway.url));

    let storage: Arc<dyn RemoteStorage> = if config.storage.is_configured() {
        info!(bucket = %config.storage.bucket, "object storage configured");
        Arc::new(OpendalStorage::new(&config.storage)?)
    } else {
        warn!("object storage not configured, recording cannot be enabled");
        Arc::new(DisabledStorage)
    };

    let uploads = UploadQueue::new(storage.clone(), segments.clone(), &config.upload);
    let launcher = Arc::new(FfmpegLauncher::new(config.recording.clone()));
    let recording = Arc::new(RecordingManager::new(
        pool.clone(),
        launcher,
        segments.clone(),
        uploads.clone(),
        &config.recording,
        config.storage.is_configured(),
    ));
    let retention = Arc::new(RetentionSweeper::new(
        storage,
        devices.clone(),
        segments.clone(),
        &config.retention,
    ));

    // Seed statically configured devices into the store
    for device in &config.devices {
        devices.upsert(device.clone()).await?;
    }
    if !config.devices.is_empty() {
        info!(count = config.devices.len(), "devices seeded from configuration");
    }

    info!("Services initialized");
    Ok(Services {
        devices,
        segments,
        pool,
        control,
        gateway,
        uploads,
        recording,
        retention,
    })
}
