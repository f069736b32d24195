use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::commands::macros::{
    impl_deserialize_from_empty_map_and_into_unit, impl_serialize_as_empty_map,
};

/// Log show command
#[derive(Debug, Default, Serialize, Eq, PartialEq)]
pub struct LogShow<'a> {
    /// name of the log to read; all logs when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_name: Option<&'a str>,
    /// minimum timestamp of entries to include
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    /// minimum entry index to include
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
}

/// A single log entry
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct LogEntry {
    /// log message
    pub msg: String,
    /// timestamp of the entry
    pub ts: i64,
    /// severity level
    pub level: u64,
    /// entry index
    pub index: u64,
    /// module id the entry came from
    pub module: u64,
}

/// Entries of one log
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct LogData {
    /// name of the log
    pub name: String,
    /// log type
    pub r#type: u64,
    /// the entries
    pub entries: Vec<LogEntry>,
}

/// Response for [`LogShow`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct LogShowResponse {
    /// next index that will be written
    pub next_index: u64,
    /// logs with their entries
    pub logs: Vec<LogData>,
}

/// Log clear command
#[derive(Debug, Eq, PartialEq)]
pub struct LogClear;
impl_serialize_as_empty_map!(LogClear);

/// Response for [`LogClear`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct LogClearResponse;
impl_deserialize_from_empty_map_and_into_unit!(LogClearResponse);

/// Log module list command
#[derive(Debug, Eq, PartialEq)]
pub struct LogModuleList;
impl_serialize_as_empty_map!(LogModuleList);

/// Response for [`LogModuleList`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct LogModuleListResponse {
    /// module ids keyed by name
    pub module_map: HashMap<String, u64>,
}

/// Log level list command
#[derive(Debug, Eq, PartialEq)]
pub struct LogLevelList;
impl_serialize_as_empty_map!(LogLevelList);

/// Response for [`LogLevelList`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct LogLevelListResponse {
    /// level ids keyed by name
    pub level_map: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::super::macros::command_encode_decode_test;
    use super::*;
    use ciborium::cbor;

    command_encode_decode_test! {
        log_show,
        (0, 4, 0),
        LogShow{ log_name: Some("reboot_log"), ts: None, index: Some(2) },
        cbor!({
            "log_name" => "reboot_log",
            "index" => 2,
        }),
        cbor!({
            "next_index" => 4,
            "logs" => [
                {
                    "name" => "reboot_log",
                    "type" => 0,
                    "entries" => [
                        {
                            "msg" => "rebooted",
                            "ts" => 1700000000,
                            "level" => 1,
                            "index" => 2,
                            "module" => 0,
                        },
                    ],
                },
            ],
        }),
        LogShowResponse{
            next_index: 4,
            logs: vec![LogData{
                name: "reboot_log".to_string(),
                r#type: 0,
                entries: vec![LogEntry{
                    msg: "rebooted".to_string(),
                    ts: 1700000000,
                    level: 1,
                    index: 2,
                    module: 0,
                }],
            }],
        },
    }

    command_encode_decode_test! {
        log_clear,
        (2, 4, 1),
        LogClear,
        cbor!({}),
        cbor!({}),
        LogClearResponse,
    }

    command_encode_decode_test! {
        log_module_list,
        (0, 4, 3),
        LogModuleList,
        cbor!({}),
        cbor!({ "module_map" => { "DEFAULT" => 0 } }),
        LogModuleListResponse{
            module_map: HashMap::from([("DEFAULT".to_string(), 0)]),
        },
    }
}
