use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_repr::Deserialize_repr;
use strum_macros::Display;

use crate::commands::macros::{
    impl_deserialize_from_empty_map_and_into_unit, impl_serialize_as_empty_map,
};

/// Checksum type name for IEEE CRC32
pub const CHECKSUM_CRC32: &str = "crc32";
/// Checksum type name for SHA256
pub const CHECKSUM_SHA256: &str = "sha256";

/// IEEE CRC32 as computed by the device-side checksum command, for
/// verifying transfers locally.
pub fn crc32(data: &[u8]) -> u32 {
    crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC).checksum(data)
}

/// File download command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct FileDownload<'a> {
    /// offset to start download at
    pub off: u64,
    /// absolute path to a file
    pub name: &'a str,
}

/// Response for [`FileDownload`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct FileDownloadResponse {
    /// offset the response is for
    pub off: u64,
    /// chunk of data read from the file
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// length of the file, only present when `off` is 0
    pub len: Option<u64>,
}

/// File upload command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct FileUpload<'a, 'b> {
    /// offset to start/continue upload at
    pub off: u64,
    /// chunk of data to write to the file
    #[serde(with = "serde_bytes")]
    pub data: &'a [u8],
    /// absolute path to a file
    pub name: &'b str,
    /// length of the file, mandatory when `off` is 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<u64>,
}

/// Response for [`FileUpload`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct FileUploadResponse {
    /// offset of last successfully written data
    pub off: u64,
}

/// File status command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct FileStatus<'a> {
    /// absolute path to a file
    pub name: &'a str,
}

/// Response for [`FileStatus`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct FileStatusResponse {
    /// size of the file in bytes
    pub len: u64,
}

/// File checksum command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct FileChecksum<'a> {
    /// absolute path to a file
    pub name: &'a str,
    /// checksum type, [`CHECKSUM_CRC32`] or [`CHECKSUM_SHA256`];
    /// the device default is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<&'a str>,
    /// offset to start the calculation at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub off: Option<u64>,
    /// maximum number of bytes to include, 0 for the whole file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<u64>,
}

/// The checksum value, numeric for crc32 and raw bytes for hashes
#[derive(Debug, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum ChecksumOutput {
    /// numeric checksum, e.g. crc32
    Numeric(u64),
    /// hash bytes, e.g. sha256
    Bytes(serde_bytes::ByteBuf),
}

/// Response for [`FileChecksum`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct FileChecksumResponse {
    /// checksum type that was used, echoed when it was requested
    pub r#type: Option<String>,
    /// offset the calculation started at, only present when nonzero
    pub off: Option<u64>,
    /// number of bytes included
    pub len: u64,
    /// the checksum
    pub output: ChecksumOutput,
}

/// Supported checksum types command
#[derive(Debug, Eq, PartialEq)]
pub struct SupportedChecksumTypes;
impl_serialize_as_empty_map!(SupportedChecksumTypes);

/// Format of a checksum as reported by the device
#[derive(Debug, Display, Deserialize_repr, Eq, PartialEq)]
#[repr(u8)]
pub enum ChecksumFormat {
    /// plain number
    Numeric = 0,
    /// byte string
    Bytes = 1,
}

/// Properties of one supported checksum type
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct ChecksumTypeInfo {
    /// format of the checksum output
    pub format: ChecksumFormat,
    /// size of the checksum in bytes
    pub size: u64,
}

/// Response for [`SupportedChecksumTypes`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct SupportedChecksumTypesResponse {
    /// supported types keyed by name
    pub types: HashMap<String, ChecksumTypeInfo>,
}

/// File close command, releases the file handle kept open between
/// chunked transfers
#[derive(Debug, Eq, PartialEq)]
pub struct FileClose;
impl_serialize_as_empty_map!(FileClose);

/// Response for [`FileClose`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct FileCloseResponse;
impl_deserialize_from_empty_map_and_into_unit!(FileCloseResponse);
