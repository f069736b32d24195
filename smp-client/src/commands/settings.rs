use serde::{Deserialize, Serialize};

use crate::commands::macros::{
    impl_deserialize_from_empty_map_and_into_unit, impl_serialize_as_empty_map,
};

/// Setting read command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct SettingRead<'a> {
    /// name of the setting
    pub name: &'a str,
    /// maximum size of the value to return
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

/// Response for [`SettingRead`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct SettingReadResponse {
    /// binary value of the setting
    #[serde(with = "serde_bytes")]
    pub val: Vec<u8>,
    /// maximum supported size, only present when the value was truncated
    pub max_size: Option<u64>,
}

/// Setting write command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct SettingWrite<'a, 'b> {
    /// name of the setting
    pub name: &'a str,
    /// binary value to write
    #[serde(with = "serde_bytes")]
    pub val: &'b [u8],
}

/// Response for [`SettingWrite`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct SettingWriteResponse;
impl_deserialize_from_empty_map_and_into_unit!(SettingWriteResponse);

/// Setting delete command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct SettingDelete<'a> {
    /// name of the setting
    pub name: &'a str,
}

/// Response for [`SettingDelete`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct SettingDeleteResponse;
impl_deserialize_from_empty_map_and_into_unit!(SettingDeleteResponse);

/// Settings commit command, applies pending setting writes
#[derive(Debug, Eq, PartialEq)]
pub struct SettingsCommit;
impl_serialize_as_empty_map!(SettingsCommit);

/// Response for [`SettingsCommit`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct SettingsCommitResponse;
impl_deserialize_from_empty_map_and_into_unit!(SettingsCommitResponse);

/// Settings load command, reloads settings from persistent storage
#[derive(Debug, Eq, PartialEq)]
pub struct SettingsLoad;
impl_serialize_as_empty_map!(SettingsLoad);

/// Response for [`SettingsLoad`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct SettingsLoadResponse;
impl_deserialize_from_empty_map_and_into_unit!(SettingsLoadResponse);

/// Settings save command, persists the running settings
#[derive(Debug, Eq, PartialEq)]
pub struct SettingsSave;
impl_serialize_as_empty_map!(SettingsSave);

/// Response for [`SettingsSave`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct SettingsSaveResponse;
impl_deserialize_from_empty_map_and_into_unit!(SettingsSaveResponse);

#[cfg(test)]
mod tests {
    use super::super::macros::command_encode_decode_test;
    use super::*;
    use ciborium::cbor;

    command_encode_decode_test! {
        setting_read,
        (0, 3, 0),
        SettingRead{ name: "bt/name", max_size: None },
        cbor!({ "name" => "bt/name" }),
        cbor!({ "val" => ciborium::Value::Bytes(vec![0x6e, 0x6f, 0x64, 0x65]) }),
        SettingReadResponse{
            val: vec![0x6e, 0x6f, 0x64, 0x65],
            max_size: None,
        },
    }

    command_encode_decode_test! {
        setting_write,
        (2, 3, 0),
        SettingWrite{ name: "bt/name", val: &[0x6e, 0x31] },
        cbor!({
            "name" => "bt/name",
            "val" => ciborium::Value::Bytes(vec![0x6e, 0x31]),
        }),
        cbor!({}),
        SettingWriteResponse,
    }

    command_encode_decode_test! {
        setting_delete,
        (2, 3, 1),
        SettingDelete{ name: "bt/name" },
        cbor!({ "name" => "bt/name" }),
        cbor!({}),
        SettingDeleteResponse,
    }

    command_encode_decode_test! {
        settings_commit,
        (2, 3, 2),
        SettingsCommit,
        cbor!({}),
        cbor!({}),
        SettingsCommitResponse,
    }

    command_encode_decode_test! {
        settings_save,
        (2, 3, 4),
        SettingsSave,
        cbor!({}),
        cbor!({}),
        SettingsSaveResponse,
    }
}
