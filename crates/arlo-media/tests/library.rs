//! Library listing and end-to-end library downloads

#![allow(clippy::unwrap_used)]

use arlo_core::Device;
use arlo_media::{
    download_station_library, enumerate, fetch_cloud_library, MediaItem, MediaSource,
    CLOUD_LIBRARY_PATH,
};
use arlo_testkit::{
    camera, context, init_tracing, station, test_config, FakeStation, ScriptedTransport,
};
use bytes::Bytes;
use chrono::NaiveDate;
use serde_json::json;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 11, d).unwrap()
}

fn listed_item(camera: &str, created: i64, content: &str) -> serde_json::Value {
    json!({
        "uniqueId": content,
        "deviceId": camera,
        "utcCreatedDate": created,
        "presignedContentUrl": content,
    })
}

fn other_station_camera() -> Device {
    serde_json::from_value(json!({
        "deviceId": "CAM9",
        "deviceName": "Barn",
        "deviceType": "camera",
        "userId": "U1",
        "parentId": "BS9",
    }))
    .unwrap()
}

#[tokio::test]
async fn cloud_library_is_listed_one_day_at_a_time() {
    let transport = ScriptedTransport::new();
    transport.respond_json(
        CLOUD_LIBRARY_PATH,
        200,
        json!({"success": true, "data": [listed_item("CAM1", 1_700_000_000, "https://cdn/a.mp4")]}),
    );
    transport.respond_json(
        CLOUD_LIBRARY_PATH,
        200,
        json!({"success": true, "data": null}),
    );

    let items = fetch_cloud_library(transport.as_ref(), &[day(13), day(14)])
        .await
        .unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].content_url, "https://cdn/a.mp4");
    let requests = transport.requests_to(CLOUD_LIBRARY_PATH);
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].body.clone().unwrap(),
        json!({"dateFrom": "20231113", "dateTo": "20231113"})
    );
    assert_eq!(requests[1].body.clone().unwrap()["dateFrom"], "20231114");
}

#[tokio::test]
async fn enumeration_skips_present_and_unknown_media() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("${N}/%H-%M-%S").to_string_lossy().into_owned();
    let devices = vec![camera("CAM1", "Porch")];
    let items: Vec<MediaItem> = serde_json::from_value(json!([
        listed_item("CAM1", 1_700_000_000, "https://cdn/a.mp4"),
        listed_item("CAM1", 1_700_000_060_000_i64, "https://cdn/b.mp4"),
        listed_item("CAM1", 1_700_000_060, "https://cdn/b-again.mp4"),
        listed_item("CAM7", 1_700_000_000, "https://cdn/c.mp4"),
    ]))
    .unwrap();
    std::fs::create_dir_all(dir.path().join("Porch")).unwrap();
    std::fs::write(dir.path().join("Porch/22-13-20.mp4"), b"done").unwrap();

    let tasks = enumerate(items, &MediaSource::Cloud, &devices, &template).await;

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].item.content_url, "https://cdn/b.mp4");
    assert_eq!(tasks[0].destination, dir.path().join("Porch/22-14-20.mp4"));
}

#[tokio::test]
async fn one_unplaceable_item_does_not_sink_the_batch() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("${N}/%H-%M-%S").to_string_lossy().into_owned();
    let devices = vec![camera("CAM1", "Porch")];
    let items: Vec<MediaItem> = serde_json::from_value(json!([
        listed_item("CAM1", 1_700_000_000, "https://cdn/a.mp4"),
        listed_item("CAM1", i64::MAX, "https://cdn/bad-date.mp4"),
        listed_item("CAM1", 1_700_000_060, "https://cdn/b.mp4"),
    ]))
    .unwrap();

    let tasks = enumerate(items, &MediaSource::Cloud, &devices, &template).await;

    let urls: Vec<&str> = tasks.iter().map(|t| t.item.content_url.as_str()).collect();
    assert_eq!(urls, vec!["https://cdn/a.mp4", "https://cdn/b.mp4"]);
}

#[tokio::test]
async fn bad_template_skips_every_item_without_failing() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("%Q-${N}").to_string_lossy().into_owned();
    let devices = vec![camera("CAM1", "Porch")];
    let items: Vec<MediaItem> = serde_json::from_value(json!([
        listed_item("CAM1", 1_700_000_000, "https://cdn/a.mp4"),
    ]))
    .unwrap();

    let tasks = enumerate(items, &MediaSource::Cloud, &devices, &template).await;

    assert!(tasks.is_empty());
}

#[tokio::test]
async fn station_library_downloads_over_the_tunnel_and_resumes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.library_days = 0;
    let ctx = context(config, ScriptedTransport::new());
    let devices = vec![station(), camera("CAM1", "Porch"), other_station_camera()];

    let storage = FakeStation::new();
    storage.list(
        "/hmsls/list/20231114/20231114/CAM1",
        json!([listed_item("CAM1", 1_700_000_000, "/CAM1/20231114/a.mp4")]),
    );
    storage.serve(
        "/hmsls/download/CAM1/20231114/a.mp4",
        vec![Bytes::from_static(b"recording")],
    );

    let report = download_station_library(&ctx, &station(), &devices, storage.clone(), day(14))
        .await
        .unwrap();

    assert_eq!(report.downloaded, 1);
    assert_eq!(storage.listed(), vec!["/hmsls/list/20231114/20231114/CAM1"]);
    let saved = dir.path().join("media/Porch/2023-11-14_22-13-20.mp4");
    assert_eq!(std::fs::read(&saved).unwrap(), b"recording");

    let again = download_station_library(&ctx, &station(), &devices, storage.clone(), day(14))
        .await
        .unwrap();
    assert_eq!(again.downloaded, 0);
    assert_eq!(storage.downloads().len(), 1);
}
