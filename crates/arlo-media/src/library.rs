//! Media library listings and download task enumeration
//!
//! The cloud library is listed one day at a time over the account API; a
//! base station's local library is listed per day and per camera over its
//! tunnel. Either way the result is a flat list of [`MediaItem`]s, which
//! [`enumerate`] turns into [`DownloadTask`]s with resolved destinations.
//!
//! Destinations come from a template such as
//! `/media/${N}/%Y-%m-%d_%H-%M-%S`: `${SN}` is replaced by the camera's
//! device id, `${N}` by its name, the remaining `%` escapes are rendered
//! from the item's creation time in UTC, and `.mp4` is appended.

use crate::errors::{Result, TransferError};
use arlo_core::{ApiRequest, ByteStream, Device, Transport};
use arlo_ratls::{Tunnel, TunnelError};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Cloud media library, POSTed once per day
pub const CLOUD_LIBRARY_PATH: &str = "/hmsweb/users/library";
/// Base station library, `/<from>/<to>/<camera_id>` appended
pub const LOCAL_LIBRARY_PATH: &str = "/hmsls/list";

/// Replaced by the camera's device id in destination templates
pub const DEVICE_ID_TOKEN: &str = "${SN}";
/// Replaced by the camera's name in destination templates
pub const DEVICE_NAME_TOKEN: &str = "${N}";

// creation times above this are milliseconds
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// One recording as a library listing reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    /// Listing's identifier for the recording
    #[serde(default)]
    pub unique_id: String,
    /// Camera that made the recording
    pub device_id: String,
    /// Creation time, epoch seconds or milliseconds
    pub utc_created_date: i64,
    /// Absolute URL for cloud items, station-relative path for local ones
    #[serde(rename = "presignedContentUrl", default)]
    pub content_url: String,
    /// MIME type, when listed
    #[serde(default)]
    pub content_type: Option<String>,
    /// Length in seconds, when listed
    #[serde(default)]
    pub media_duration_second: Option<u64>,
}

impl MediaItem {
    /// Creation time, whichever unit the listing used
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let secs = if self.utc_created_date > MILLIS_THRESHOLD {
            self.utc_created_date / 1000
        } else {
            self.utc_created_date
        };
        DateTime::<Utc>::from_timestamp(secs, 0)
    }
}

/// Where a library was listed from, and so where its content lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// The account's cloud library
    Cloud,
    /// A base station's local storage, reached over its tunnel
    Station(String),
}

impl MediaSource {
    /// Whether the content is fetched over a station tunnel
    pub fn is_local(&self) -> bool {
        matches!(self, MediaSource::Station(_))
    }
}

impl std::fmt::Display for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaSource::Cloud => f.write_str("cloud"),
            MediaSource::Station(id) => write!(f, "station {id}"),
        }
    }
}

/// One pending download
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Listed recording
    pub item: MediaItem,
    /// Where the content is fetched from
    pub source: MediaSource,
    /// Final path of the downloaded file
    pub destination: PathBuf,
}

/// Listing and download access to a base station's local storage
#[async_trait]
pub trait LocalStorage: Send + Sync {
    /// GET a JSON listing
    async fn list(&self, path: &str) -> std::result::Result<Value, TunnelError>;

    /// GET a file body as a stream
    async fn download(&self, path: &str) -> std::result::Result<ByteStream, TunnelError>;
}

#[async_trait]
impl LocalStorage for Tunnel {
    async fn list(&self, path: &str) -> std::result::Result<Value, TunnelError> {
        self.get_json(path).await
    }

    async fn download(&self, path: &str) -> std::result::Result<ByteStream, TunnelError> {
        self.get_stream(path).await
    }
}

/// Render the destination of `item`, recorded by `camera`
pub fn destination_for(template: &str, item: &MediaItem, camera: &Device) -> Result<PathBuf> {
    let template_error = |reason: String| TransferError::Template {
        template: template.to_string(),
        reason,
    };
    let created = item.created_at().ok_or_else(|| {
        template_error(format!(
            "creation time {} is out of range",
            item.utc_created_date
        ))
    })?;

    let pattern = format!("{template}.mp4")
        .replace(DEVICE_ID_TOKEN, &literal(&camera.device_id))
        .replace(DEVICE_NAME_TOKEN, &literal(&camera.device_name));

    let mut rendered = String::new();
    write!(rendered, "{}", created.format(&pattern))
        .map_err(|_| template_error("invalid strftime escape".to_string()))?;
    Ok(PathBuf::from(rendered))
}

// device names are user-chosen; keep them from adding escapes or directories
fn literal(value: &str) -> String {
    value.replace('%', "%%").replace('/', "_")
}

/// Every day from `days` before `today` through `today`
pub fn library_window(days: u32, today: NaiveDate) -> Vec<NaiveDate> {
    let from = today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN);
    from.iter_days().take_while(|day| *day <= today).collect()
}

fn datestamp(day: NaiveDate) -> String {
    day.format("%Y%m%d").to_string()
}

fn decode_listing(data: Value) -> Result<Vec<MediaItem>> {
    if data.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(data).map_err(|source| TransferError::Decode {
        what: "media listing",
        source,
    })
}

/// List the cloud library for each of `days`
pub async fn fetch_cloud_library(
    transport: &dyn Transport,
    days: &[NaiveDate],
) -> Result<Vec<MediaItem>> {
    let mut items = Vec::new();
    for day in days {
        let stamp = datestamp(*day);
        debug!(day = %stamp, "listing cloud library");
        let data = transport
            .call(ApiRequest::post(
                CLOUD_LIBRARY_PATH,
                json!({ "dateFrom": stamp, "dateTo": stamp }),
            ))
            .await?;
        items.extend(decode_listing(data)?);
    }
    Ok(items)
}

/// List a station's local library for each of `days` and each of `cameras`
pub async fn fetch_local_library(
    storage: &dyn LocalStorage,
    cameras: &[Device],
    days: &[NaiveDate],
) -> Result<Vec<MediaItem>> {
    let mut items = Vec::new();
    for day in days {
        let stamp = datestamp(*day);
        for camera in cameras {
            let path = format!("{LOCAL_LIBRARY_PATH}/{stamp}/{stamp}/{}", camera.device_id);
            debug!(path = %path, "listing local library");
            items.extend(decode_listing(storage.list(&path).await?)?);
        }
    }
    Ok(items)
}

/// Turn listed items into download tasks.
///
/// Items whose destination already exists are skipped, as are repeats of a
/// destination within the batch and items from cameras not in `devices`.
/// An item whose destination cannot be rendered or checked is logged and
/// skipped; the rest of the batch is unaffected.
pub async fn enumerate(
    items: Vec<MediaItem>,
    source: &MediaSource,
    devices: &[Device],
    template: &str,
) -> Vec<DownloadTask> {
    let mut seen = HashSet::new();
    let mut tasks = Vec::new();
    for item in items {
        let Some(camera) = devices.iter().find(|d| d.device_id == item.device_id) else {
            warn!(device_id = %item.device_id, unique_id = %item.unique_id, "media from unknown camera, skipping");
            continue;
        };
        let destination = match destination_for(template, &item, camera) {
            Ok(destination) => destination,
            Err(e) => {
                warn!(unique_id = %item.unique_id, error = %e, "no destination for media, skipping");
                continue;
            }
        };
        if !seen.insert(destination.clone()) {
            continue;
        }
        let exists = match tokio::fs::try_exists(&destination).await {
            Ok(exists) => exists,
            Err(e) => {
                let error = TransferError::io(&destination, e);
                warn!(unique_id = %item.unique_id, error = %error, "cannot check destination, skipping");
                continue;
            }
        };
        if exists {
            debug!(destination = %destination.display(), "already downloaded");
            continue;
        }
        tasks.push(DownloadTask {
            item,
            source: source.clone(),
            destination,
        });
    }
    debug!(source = %source, tasks = tasks.len(), "enumerated media");
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(name: &str) -> Device {
        serde_json::from_value(json!({
            "deviceId": "CAM1",
            "deviceName": name,
            "deviceType": "camera",
            "userId": "U1",
            "parentId": "BS1",
        }))
        .unwrap()
    }

    fn item(created: i64) -> MediaItem {
        serde_json::from_value(json!({
            "uniqueId": "m1",
            "deviceId": "CAM1",
            "utcCreatedDate": created,
            "presignedContentUrl": "https://cdn.example.com/m1.mp4?sig=1",
        }))
        .unwrap()
    }

    #[test]
    fn creation_time_accepts_seconds_and_milliseconds() {
        let secs = item(1_700_000_000).created_at().unwrap();
        let millis = item(1_700_000_000_123).created_at().unwrap();
        assert_eq!(secs, millis);
        assert_eq!(secs.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn template_substitutes_camera_and_time() {
        let path = destination_for(
            "/media/${N}/${SN}_%Y-%m-%d_%H-%M-%S",
            &item(1_700_000_000),
            &camera("Porch"),
        )
        .unwrap();
        assert_eq!(
            path,
            PathBuf::from("/media/Porch/CAM1_2023-11-14_22-13-20.mp4")
        );
    }

    #[test]
    fn device_names_render_literally() {
        let path = destination_for("/media/${N}", &item(1_700_000_000), &camera("50% off/back"))
            .unwrap();
        assert_eq!(path, PathBuf::from("/media/50% off_back.mp4"));
    }

    #[test]
    fn bad_escape_is_a_template_error() {
        let result = destination_for("/media/%Q", &item(1_700_000_000), &camera("Porch"));
        assert!(matches!(result, Err(TransferError::Template { .. })));
    }

    #[test]
    fn window_spans_the_requested_days_inclusive() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let days = library_window(2, today);
        assert_eq!(
            days,
            vec![
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                today,
            ]
        );
        assert_eq!(library_window(0, today), vec![today]);
    }

    #[test]
    fn null_listing_is_empty() {
        assert!(decode_listing(Value::Null).unwrap().is_empty());
    }
}
