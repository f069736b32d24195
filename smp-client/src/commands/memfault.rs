use serde::Deserialize;

use crate::commands::macros::impl_serialize_as_empty_map;

/// Device info command of the Memfault vendor group
#[derive(Debug, Eq, PartialEq)]
pub struct DeviceInfo;
impl_serialize_as_empty_map!(DeviceInfo);

/// Response for [`DeviceInfo`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct DeviceInfoResponse {
    /// device serial number
    #[serde(default)]
    pub device_serial: Option<String>,
    /// hardware version string
    #[serde(default)]
    pub hardware_version: Option<String>,
    /// software type identifier
    #[serde(default)]
    pub software_type: Option<String>,
    /// software version string
    #[serde(default)]
    pub software_version: Option<String>,
}

/// Project key command of the Memfault vendor group
#[derive(Debug, Eq, PartialEq)]
pub struct ProjectKey;
impl_serialize_as_empty_map!(ProjectKey);

/// Response for [`ProjectKey`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct ProjectKeyResponse {
    /// the project key the device reports diagnostics under
    pub project_key: String,
}
