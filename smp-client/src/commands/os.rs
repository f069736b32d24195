use std::collections::HashMap;

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use super::{
    is_default,
    macros::{impl_deserialize_from_empty_map_and_into_unit, impl_serialize_as_empty_map},
};

/// Largest packet an [`Echo`] command may produce.
///
/// Larger requests are rejected locally before touching the transport.
pub const ECHO_MAX_PACKET_SIZE: usize = 2475;

/// Echo command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct Echo<'a> {
    /// string to be replied by the echo service
    pub d: &'a str,
}

/// Response for [`Echo`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct EchoResponse {
    /// replying echo string
    pub r: String,
}

/// Console echo control command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct ConsoleEcho {
    /// whether the device console echoes received characters
    pub echo: bool,
}

/// Response for [`ConsoleEcho`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct ConsoleEchoResponse;
impl_deserialize_from_empty_map_and_into_unit!(ConsoleEchoResponse);

/// Task statistics command
#[derive(Debug, Eq, PartialEq)]
pub struct TaskStatistics;
impl_serialize_as_empty_map!(TaskStatistics);

/// Statistics of an MCU task/thread
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct TaskStatisticsEntry {
    /// task priority
    pub prio: i32,
    /// numeric task ID
    pub tid: u32,
    /// numeric task state
    pub state: u32,
    /// stack usage
    pub stkuse: Option<u64>,
    /// stack size
    pub stksiz: Option<u64>,
    /// context switch count
    pub cswcnt: Option<u64>,
    /// runtime in ticks
    pub runtime: Option<u64>,
}

/// Response for [`TaskStatistics`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct TaskStatisticsResponse {
    /// Dictionary of task names with their respective statistics
    pub tasks: HashMap<String, TaskStatisticsEntry>,
}

/// Memory pool statistics command
#[derive(Debug, Eq, PartialEq)]
pub struct MemoryPoolStatistics;
impl_serialize_as_empty_map!(MemoryPoolStatistics);

/// Statistics of a single memory pool
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct MemoryPoolEntry {
    /// size of a block in the pool
    pub blksiz: u64,
    /// number of blocks in the pool
    pub nblks: u64,
    /// number of free blocks
    pub nfree: u64,
    /// lowest number of free blocks observed
    pub min: Option<u64>,
}

/// Response for [`MemoryPoolStatistics`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct MemoryPoolStatisticsResponse {
    /// Dictionary of pool names with their respective statistics
    pub mpools: HashMap<String, MemoryPoolEntry>,
}

/// Parses a [`chrono::NaiveDateTime`] object with optional timezone specifiers
fn deserialize_datetime_and_ignore_timezone<'de, D>(
    de: D,
) -> Result<chrono::NaiveDateTime, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NaiveOrFixed {
        Naive(chrono::NaiveDateTime),
        Fixed(chrono::DateTime<chrono::FixedOffset>),
    }

    NaiveOrFixed::deserialize(de).map(|val| match val {
        NaiveOrFixed::Naive(naive_date_time) => naive_date_time,
        NaiveOrFixed::Fixed(date_time) => date_time.naive_local(),
    })
}

/// Serializes a [`chrono::NaiveDateTime`] object with zero or three
/// fractional digits, the two forms devices accept
fn serialize_datetime_with_millis<S>(
    value: &chrono::NaiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    if value.time().nanosecond() != 0 {
        serializer.serialize_str(&format!("{}", value.format("%Y-%m-%dT%H:%M:%S%.3f")))
    } else {
        serializer.serialize_str(&format!("{}", value.format("%Y-%m-%dT%H:%M:%S")))
    }
}

/// Date-time get command
#[derive(Debug, Eq, PartialEq)]
pub struct DateTimeGet;
impl_serialize_as_empty_map!(DateTimeGet);

/// Response for [`DateTimeGet`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct DateTimeGetResponse {
    /// String in format: `yyyy-MM-dd'T'HH:mm:ss.SSS`.
    #[serde(deserialize_with = "deserialize_datetime_and_ignore_timezone")]
    pub datetime: chrono::NaiveDateTime,
}

/// Date-time set command
#[derive(Serialize, Debug, Eq, PartialEq)]
pub struct DateTimeSet {
    /// String in format: `yyyy-MM-dd'T'HH:mm:ss.SSS`.
    #[serde(serialize_with = "serialize_datetime_with_millis")]
    pub datetime: chrono::NaiveDateTime,
}

/// Response for [`DateTimeSet`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct DateTimeSetResponse;
impl_deserialize_from_empty_map_and_into_unit!(DateTimeSetResponse);

/// System reset command
#[derive(Serialize, Debug, Default, Eq, PartialEq)]
pub struct SystemReset {
    /// Forces reset
    #[serde(skip_serializing_if = "is_default")]
    pub force: bool,
    /// Boot mode
    ///
    /// - 0: Normal boot
    /// - 1: Bootloader recovery mode
    ///
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_mode: Option<u8>,
}

/// Response for [`SystemReset`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct SystemResetResponse;
impl_deserialize_from_empty_map_and_into_unit!(SystemResetResponse);

/// MCUmgr parameters command
#[derive(Debug, Eq, PartialEq)]
pub struct Parameters;
impl_serialize_as_empty_map!(Parameters);

/// Response for [`Parameters`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct ParametersResponse {
    /// Single SMP buffer size, this includes SMP header and CBOR payload
    pub buf_size: u32,
    /// Number of SMP buffers supported
    pub buf_count: u32,
}

/// Application info command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct ApplicationInfo<'a> {
    /// Format specifier of the requested response, `printf`-style set of
    /// single characters. `"a"` requests all parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'a str>,
}

/// Response for [`ApplicationInfo`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct ApplicationInfoResponse {
    /// Text response formatted as requested
    pub output: String,
}

/// Bootloader info command, default query returning the bootloader name
#[derive(Debug, Eq, PartialEq)]
pub struct BootloaderName;
impl_serialize_as_empty_map!(BootloaderName);

/// Response for [`BootloaderName`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct BootloaderNameResponse {
    /// Name of the bootloader, e.g. `"MCUboot"`
    pub bootloader: String,
}

/// Bootloader info command querying the MCUboot mode
#[derive(Debug, Eq, PartialEq)]
pub struct BootloaderMode;

impl Serialize for BootloaderMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("query", "mode")?;
        map.end()
    }
}

/// Response for [`BootloaderMode`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct BootloaderModeResponse {
    /// Numeric MCUboot mode (single application, swap using scratch, ...)
    pub mode: i32,
    /// true if the bootloader refuses downgrades
    #[serde(default)]
    pub no_downgrade: bool,
}
