use serde::{Deserialize, Serialize};

use crate::commands::macros::{
    impl_deserialize_from_empty_map_and_into_unit, impl_serialize_as_empty_map,
};

fn serialize_option_hex<S, T>(data: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
    T: hex::ToHex,
{
    data.as_ref()
        .map(|val| val.encode_hex::<String>())
        .serialize(serializer)
}

/// Number of leading hash bytes sent as the upload session identifier.
pub const UPLOAD_SHA_LEN: usize = 3;

/// The state of an image slot
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct ImageSlotState {
    /// image number
    #[serde(default)]
    pub image: u32,
    /// slot number within "image"; 0 is the primary slot, 1 the secondary
    pub slot: u32,
    /// string representing the image version
    #[serde(default)]
    pub version: Option<String>,
    /// SHA256 hash of the image header and body as stored in the MCUboot
    /// TLV section
    #[serde(serialize_with = "serialize_option_hex")] // For log output
    pub hash: Option<[u8; 32]>,
    /// true if image has the bootable flag set
    #[serde(default)]
    pub bootable: bool,
    /// true if image is set for a one-shot test boot on next reset
    #[serde(default)]
    pub pending: bool,
    /// true if image has been confirmed
    #[serde(default)]
    pub confirmed: bool,
    /// true if image is the currently running application
    #[serde(default)]
    pub active: bool,
    /// true if image stays in the primary slot after the next boot
    #[serde(default)]
    pub permanent: bool,
}

/// Get image state command
#[derive(Debug, Eq, PartialEq)]
pub struct GetImageState;
impl_serialize_as_empty_map!(GetImageState);

/// Response for [`GetImageState`] and [`SetImageState`] commands
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ImageStateResponse {
    /// List of all images and their state
    pub images: Vec<ImageSlotState>,
    /// split image status, unused by modern devices
    #[serde(rename = "splitStatus")]
    pub split_status: Option<i32>,
}

/// Set image state command, used both for marking an image for a test boot
/// (`confirm: false`) and for confirming it (`confirm: true`)
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct SetImageState<'a> {
    /// SHA256 hash selecting the image.
    ///
    /// If `confirm` is `true` this can be omitted, which will select the
    /// currently running image.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(with = "serde_bytes")]
    pub hash: Option<&'a [u8; 32]>,
    /// If true, mark the given image as confirmed.
    ///
    /// If false, perform a test boot with the given image and revert upon
    /// the following reset.
    pub confirm: bool,
}

/// Image upload command, one chunk of a streamed image write
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct ImageUpload<'a, 'b> {
    /// image number; only present on the first chunk, and omitted for
    /// image 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<u32>,
    /// total length of the image; must appear when `off` is 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<u64>,
    /// offset of the image chunk this request carries
    pub off: u64,
    /// truncated SHA256 of the upload, identifying the upload session;
    /// only present when `off` is 0
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(with = "serde_bytes")]
    pub sha: Option<&'a [u8]>,
    /// image data to write at the provided offset
    #[serde(with = "serde_bytes")]
    pub data: &'b [u8],
}

/// Response for [`ImageUpload`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct ImageUploadResponse {
    /// offset the device expects next
    pub off: Option<u64>,
    /// whether the uploaded data matched the provided hash, sent with the
    /// final chunk
    pub r#match: Option<bool>,
}

/// Core list command
#[derive(Debug, Eq, PartialEq)]
pub struct CoreList;
impl_serialize_as_empty_map!(CoreList);

/// Response for [`CoreList`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct CoreListResponse;
impl_deserialize_from_empty_map_and_into_unit!(CoreListResponse);

/// Core load command, reads a chunk of the stored core dump
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct CoreLoad {
    /// offset to read from
    pub off: u64,
}

/// Response for [`CoreLoad`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct CoreLoadResponse {
    /// offset the data was read from
    pub off: u64,
    /// core dump data
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// total size of the core dump, only present at offset 0
    pub len: Option<u64>,
}

/// Core erase command
#[derive(Debug, Eq, PartialEq)]
pub struct CoreErase;
impl_serialize_as_empty_map!(CoreErase);

/// Response for [`CoreErase`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct CoreEraseResponse;
impl_deserialize_from_empty_map_and_into_unit!(CoreEraseResponse);

/// Image erase command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct ImageErase {
    /// slot number; when absent the secondary slot is assumed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<u32>,
}

/// Response for [`ImageErase`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct ImageEraseResponse;
impl_deserialize_from_empty_map_and_into_unit!(ImageEraseResponse);

/// Erase state command, clears the pending/confirmed markers of the
/// secondary slot
#[derive(Debug, Eq, PartialEq)]
pub struct EraseState;
impl_serialize_as_empty_map!(EraseState);

/// Response for [`EraseState`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct EraseStateResponse;
impl_deserialize_from_empty_map_and_into_unit!(EraseStateResponse);
