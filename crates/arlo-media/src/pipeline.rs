//! List, enumerate and download a whole library in one call

use crate::errors::Result;
use crate::library::{
    enumerate, fetch_cloud_library, fetch_local_library, library_window, LocalStorage,
    MediaSource,
};
use crate::router::Router;
use crate::transfer::{run, TransferReport};
use arlo_core::{ClientContext, Device, DeviceKind};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::info;

/// Download the account's cloud library for the configured window ending `today`
pub async fn download_cloud_library(
    ctx: &ClientContext,
    devices: &[Device],
    router: Arc<Router>,
    today: NaiveDate,
) -> Result<TransferReport> {
    let config = &ctx.config;
    let days = library_window(config.library_days, today);
    let items = fetch_cloud_library(ctx.transport.as_ref(), &days).await?;
    info!(items = items.len(), days = days.len(), "cloud library listed");

    let tasks = enumerate(items, &MediaSource::Cloud, devices, &config.save_media_to).await;
    Ok(run(router, tasks, config.download_concurrency).await)
}

/// Download `station`'s local library over `storage`, normally its tunnel
pub async fn download_station_library(
    ctx: &ClientContext,
    station: &Device,
    devices: &[Device],
    storage: Arc<dyn LocalStorage>,
    today: NaiveDate,
) -> Result<TransferReport> {
    let config = &ctx.config;
    let cameras: Vec<Device> = devices
        .iter()
        .filter(|d| d.is_child_of(station) && d.kind() == DeviceKind::Camera)
        .cloned()
        .collect();
    let days = library_window(config.library_days, today);
    let items = fetch_local_library(storage.as_ref(), &cameras, &days).await?;
    info!(station = %station, items = items.len(), cameras = cameras.len(), "local library listed");

    let source = MediaSource::Station(station.device_id.clone());
    let tasks = enumerate(items, &source, &cameras, &config.save_media_to).await;
    let router = Arc::new(Router::new(ctx).with_tunnel(storage));
    Ok(run(router, tasks, config.download_concurrency).await)
}
