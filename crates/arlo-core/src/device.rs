//! Device records as the cloud API reports them
//!
//! Field names follow Rust conventions; the serde renames are the mapping
//! from the service's wire keys.

use crate::errors::{CoreError, Result};
use crate::transport::{ApiRequest, Transport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Path listing every device on the account
pub const DEVICES_PATH: &str = "/hmsweb/v2/users/devices";

/// Kind of device, from the `deviceType` wire value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    /// Hub that cameras attach to; hosts local storage
    BaseStation,
    /// Camera
    Camera,
    /// Anything else
    Other(String),
}

impl DeviceKind {
    fn from_wire(value: &str) -> Self {
        match value {
            "basestation" => DeviceKind::BaseStation,
            "camera" => DeviceKind::Camera,
            other => DeviceKind::Other(other.to_string()),
        }
    }
}

/// One device on the account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Cloud device id, used for commands
    pub device_id: String,
    /// User-facing name
    #[serde(default)]
    pub device_name: String,
    /// Raw device type
    #[serde(default)]
    pub device_type: String,
    /// Owning user
    #[serde(default)]
    pub user_id: String,
    /// Hardware identity; keys the certificate bundle
    #[serde(default)]
    pub unique_id: String,
    /// Cloud relay id sent as the `xcloudId` header
    #[serde(default, rename = "xCloudId")]
    pub xcloud_id: String,
    /// Hardware model
    #[serde(default)]
    pub model_id: String,
    /// Base station this device hangs off, if any
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Last modification, epoch milliseconds
    #[serde(default, rename = "lastModified")]
    pub last_modified_ms: i64,
    /// Creation, epoch milliseconds
    #[serde(default, rename = "dateCreated")]
    pub date_created_ms: i64,
    /// IANA time zone name
    #[serde(default)]
    pub time_zone: Option<String>,
    /// Type-specific properties kept as raw JSON
    #[serde(default)]
    pub properties: Option<Value>,
}

impl Device {
    /// Decoded device type
    pub fn kind(&self) -> DeviceKind {
        DeviceKind::from_wire(&self.device_type)
    }

    /// Resource path used in command payloads, e.g. `cameras/<id>`
    pub fn resource_id(&self) -> String {
        let kind = match self.kind() {
            DeviceKind::BaseStation => "basestations",
            DeviceKind::Camera => "cameras",
            DeviceKind::Other(_) => "devices",
        };
        format!("{kind}/{}", self.device_id)
    }

    /// Actor id for commands sent on the device owner's behalf
    pub fn web_id(&self) -> String {
        format!("{}_web", self.user_id)
    }

    /// Whether this device is attached to `station`
    pub fn is_child_of(&self, station: &Device) -> bool {
        self.parent_id.as_deref() == Some(station.device_id.as_str())
            && self.device_id != station.device_id
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.device_name, self.device_id)
    }
}

/// Fetch every device on the account
pub async fn fetch_devices(transport: &dyn Transport) -> Result<Vec<Device>> {
    let stamp = chrono::Utc::now().timestamp();
    let data = transport
        .call(ApiRequest::get(format!("{DEVICES_PATH}?t={stamp}")))
        .await?;
    serde_json::from_value(data).map_err(|source| CoreError::Decode {
        what: "device list",
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn station() -> Device {
        serde_json::from_value(json!({
            "deviceId": "BS1",
            "deviceName": "Hub",
            "deviceType": "basestation",
            "userId": "U1",
            "uniqueId": "U1_BS1",
            "xCloudId": "XC1",
            "modelId": "VMB4000",
            "parentId": "BS1",
            "lastModified": 1_600_000_000_000_i64,
            "dateCreated": 1_500_000_000_000_i64,
        }))
        .unwrap()
    }

    #[test]
    fn wire_keys_map_to_fields() {
        let station = station();
        assert_eq!(station.xcloud_id, "XC1");
        assert_eq!(station.unique_id, "U1_BS1");
        assert_eq!(station.kind(), DeviceKind::BaseStation);
        assert_eq!(station.resource_id(), "basestations/BS1");
        assert_eq!(station.web_id(), "U1_web");
    }

    #[test]
    fn cameras_are_children_of_their_station() {
        let station = station();
        let camera: Device = serde_json::from_value(json!({
            "deviceId": "CAM1",
            "deviceType": "camera",
            "parentId": "BS1",
        }))
        .unwrap();
        assert!(camera.is_child_of(&station));
        // a station lists itself as its own parent
        assert!(!station.is_child_of(&station));
        assert_eq!(camera.resource_id(), "cameras/CAM1");
    }
}
