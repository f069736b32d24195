use serde::{Deserialize, Serialize};
use serde_repr::Serialize_repr;
use strum_macros::Display;

use crate::commands::macros::impl_serialize_as_empty_map;

/// Role of a SUIT manifest within the device.
///
/// Unknown roles decode to [`ManifestRole::Unknown`] so that listings from
/// newer devices still parse.
#[derive(Debug, Display, Copy, Clone, Serialize_repr, Eq, PartialEq)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum ManifestRole {
    Unknown = 0,
    SecTop = 0x10,
    SecSdfw = 0x11,
    SecSysctrl = 0x12,
    AppRoot = 0x20,
    AppRecovery = 0x21,
    AppLocal1 = 0x22,
    AppLocal2 = 0x23,
    AppLocal3 = 0x24,
    RadRecovery = 0x30,
    RadLocal1 = 0x31,
    RadLocal2 = 0x32,
}

impl From<u32> for ManifestRole {
    fn from(raw: u32) -> Self {
        match raw {
            0x10 => ManifestRole::SecTop,
            0x11 => ManifestRole::SecSdfw,
            0x12 => ManifestRole::SecSysctrl,
            0x20 => ManifestRole::AppRoot,
            0x21 => ManifestRole::AppRecovery,
            0x22 => ManifestRole::AppLocal1,
            0x23 => ManifestRole::AppLocal2,
            0x24 => ManifestRole::AppLocal3,
            0x30 => ManifestRole::RadRecovery,
            0x31 => ManifestRole::RadLocal1,
            0x32 => ManifestRole::RadLocal2,
            _ => ManifestRole::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for ManifestRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        u32::deserialize(deserializer).map(ManifestRole::from)
    }
}

/// Manifest list command
#[derive(Debug, Eq, PartialEq)]
pub struct ManifestList;
impl_serialize_as_empty_map!(ManifestList);

/// One entry of a [`ManifestList`] response
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct ManifestListEntry {
    /// role of the manifest
    pub role: ManifestRole,
}

/// Response for [`ManifestList`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct ManifestListResponse {
    /// roles of all manifests installed on the device
    pub manifests: Vec<ManifestListEntry>,
}

/// Manifest state command, fetches the state of the manifest with the
/// given role
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct ManifestState {
    /// role selecting the manifest
    pub role: ManifestRole,
}

/// Response for [`ManifestState`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct ManifestStateResponse {
    /// role of the manifest
    pub role: ManifestRole,
    /// class id of the manifest
    #[serde(default)]
    pub class_id: Option<serde_bytes::ByteBuf>,
    /// vendor id of the manifest
    #[serde(default)]
    pub vendor_id: Option<serde_bytes::ByteBuf>,
    /// digest of the installed envelope
    #[serde(default)]
    pub digest: Option<serde_bytes::ByteBuf>,
    /// algorithm id of the digest, `-16` for SHA256
    #[serde(default)]
    pub digest_algorithm: Option<i32>,
    /// sequence number of the manifest
    #[serde(default)]
    pub sequence_number: Option<u64>,
    /// semantic version of the manifest
    #[serde(default)]
    pub semantic_version: Option<Vec<i64>>,
}

/// Envelope upload command, one chunk of a streamed SUIT envelope write
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct EnvelopeUpload<'a> {
    /// total length of the envelope; must appear when `off` is 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<u64>,
    /// offset of the envelope chunk this request carries
    pub off: u64,
    /// envelope data to write at the provided offset
    #[serde(with = "serde_bytes")]
    pub data: &'a [u8],
}

/// Response for [`EnvelopeUpload`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct EnvelopeUploadResponse {
    /// offset the device expects next
    pub off: Option<u64>,
}
