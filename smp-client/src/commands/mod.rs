/// Basic (Zephyr vendor) group commands
pub mod basic;
/// Crash management group commands
pub mod crash;
/// File management group commands
pub mod fs;
/// Application/software image management group commands
pub mod image;
/// Log management group commands
pub mod logs;
/// Memfault vendor group commands
pub mod memfault;
/// Default/OS management group commands
pub mod os;
/// Run test management group commands
pub mod run;
/// Settings (config) management group commands
pub mod settings;
/// Shell management group commands
pub mod shell;
/// Statistics management group commands
pub mod stats;
/// SUIT manifest and envelope commands
pub mod suit;

pub(crate) mod macros;
use macros::impl_command;

use serde::{Deserialize, Serialize};

use crate::Group;
use crate::header::Operation;
use crate::return_codes::{GroupError, ReturnCode};

/// An SMP command that can be executed through
/// [`Connection::execute`](crate::connection::Connection::execute).
pub trait McuMgrCommand: Serialize {
    /// the response payload type
    type Response: serde::de::DeserializeOwned;
    /// whether the command is a read or a write
    const OPERATION: Operation;
    /// the command group
    const GROUP: Group;
    /// the command id within the group
    const COMMAND_ID: u8;
}

/// SMP version 2 group based error structure.
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct RawGroupError {
    /// group of the group-based error code
    pub group: u16,
    /// index of the group-based error code
    pub rc: u64,
}

/// The error-bearing subset of every SMP response.
///
/// Decoded ahead of the typed response so that error replies, which usually
/// lack the command-specific fields, do not show up as decode failures.
#[derive(Debug, Default, Deserialize, Eq, PartialEq)]
pub struct RawError {
    /// SMP version 1 error code
    pub rc: Option<u64>,
    /// SMP version 1 error string
    pub rsn: Option<String>,
    /// SMP version 2 error structure
    pub err: Option<RawGroupError>,
}

impl RawError {
    /// Maps the decoded `rc`/`err` fields to a uniform result.
    ///
    /// An absent `rc` with an absent `err` counts as success only for the
    /// caller that sees command-specific fields; pure emptiness is not
    /// interpreted here.
    pub fn check(&self) -> Result<(), ResponseStatus> {
        if let Some(RawGroupError { group, rc }) = self.err {
            let error = GroupError { group, rc };
            if !error.is_success() {
                return Err(ResponseStatus::Group(error));
            }
        }
        if let Some(rc) = self.rc {
            let code = ReturnCode::from_raw(rc);
            if !code.is_success() {
                return Err(ResponseStatus::ReturnCode(code));
            }
        }
        Ok(())
    }
}

/// A non-success response status.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    /// general `rc` error
    ReturnCode(ReturnCode),
    /// version 2 group error
    Group(GroupError),
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseStatus::ReturnCode(code) => write!(f, "{code}"),
            ResponseStatus::Group(error) => write!(f, "{error}"),
        }
    }
}

impl ResponseStatus {
    /// Whether the device rejected the command as not supported.
    pub fn is_not_supported(&self) -> bool {
        match self {
            ResponseStatus::ReturnCode(code) => *code == ReturnCode::NotSupported,
            ResponseStatus::Group(_) => false,
        }
    }
}

/// A writer that discards data and counts the bytes that pass through,
/// used to probe encoded sizes.
pub(crate) struct CountingWriter {
    pub(crate) bytes_written: usize,
}

impl CountingWriter {
    pub(crate) fn new() -> Self {
        Self { bytes_written: 0 }
    }
}

impl std::io::Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes_written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Checks if a value is the default value
fn is_default<T: Default + PartialEq>(val: &T) -> bool {
    val == &T::default()
}

impl_command!((read,  Os, 0): os::Echo<'_> => os::EchoResponse);
impl_command!((write, Os, 1): os::ConsoleEcho => os::ConsoleEchoResponse);
impl_command!((read,  Os, 2): os::TaskStatistics => os::TaskStatisticsResponse);
impl_command!((read,  Os, 3): os::MemoryPoolStatistics => os::MemoryPoolStatisticsResponse);
impl_command!((read,  Os, 4): os::DateTimeGet => os::DateTimeGetResponse);
impl_command!((write, Os, 4): os::DateTimeSet => os::DateTimeSetResponse);
impl_command!((write, Os, 5): os::SystemReset => os::SystemResetResponse);
impl_command!((read,  Os, 6): os::Parameters => os::ParametersResponse);
impl_command!((read,  Os, 7): os::ApplicationInfo<'_> => os::ApplicationInfoResponse);
impl_command!((read,  Os, 8): os::BootloaderName => os::BootloaderNameResponse);
impl_command!((read,  Os, 8): os::BootloaderMode => os::BootloaderModeResponse);

impl_command!((read,  Image, 0): image::GetImageState => image::ImageStateResponse);
impl_command!((write, Image, 0): image::SetImageState<'_> => image::ImageStateResponse);
impl_command!((write, Image, 1): image::ImageUpload<'_, '_> => image::ImageUploadResponse);
impl_command!((read,  Image, 3): image::CoreList => image::CoreListResponse);
impl_command!((read,  Image, 4): image::CoreLoad => image::CoreLoadResponse);
impl_command!((write, Image, 4): image::CoreErase => image::CoreEraseResponse);
impl_command!((write, Image, 5): image::ImageErase => image::ImageEraseResponse);
impl_command!((write, Image, 6): image::EraseState => image::EraseStateResponse);

impl_command!((read,  Stats, 0): stats::StatisticsRead<'_> => stats::StatisticsReadResponse);
impl_command!((read,  Stats, 1): stats::StatisticsList => stats::StatisticsListResponse);

impl_command!((read,  Settings, 0): settings::SettingRead<'_> => settings::SettingReadResponse);
impl_command!((write, Settings, 0): settings::SettingWrite<'_, '_> => settings::SettingWriteResponse);
impl_command!((write, Settings, 1): settings::SettingDelete<'_> => settings::SettingDeleteResponse);
impl_command!((write, Settings, 2): settings::SettingsCommit => settings::SettingsCommitResponse);
impl_command!((write, Settings, 3): settings::SettingsLoad => settings::SettingsLoadResponse);
impl_command!((write, Settings, 4): settings::SettingsSave => settings::SettingsSaveResponse);

impl_command!((read,  Logs, 0): logs::LogShow<'_> => logs::LogShowResponse);
impl_command!((write, Logs, 1): logs::LogClear => logs::LogClearResponse);
impl_command!((read,  Logs, 3): logs::LogModuleList => logs::LogModuleListResponse);
impl_command!((read,  Logs, 4): logs::LogLevelList => logs::LogLevelListResponse);

impl_command!((write, Crash, 0): crash::CrashTest => crash::CrashTestResponse);

impl_command!((write, Run, 0): run::RunTest<'_> => run::RunTestResponse);
impl_command!((read,  Run, 1): run::RunList => run::RunListResponse);

impl_command!((write, Fs, 0): fs::FileUpload<'_, '_> => fs::FileUploadResponse);
impl_command!((read,  Fs, 0): fs::FileDownload<'_> => fs::FileDownloadResponse);
impl_command!((read,  Fs, 1): fs::FileStatus<'_> => fs::FileStatusResponse);
impl_command!((read,  Fs, 2): fs::FileChecksum<'_> => fs::FileChecksumResponse);
impl_command!((read,  Fs, 3): fs::SupportedChecksumTypes => fs::SupportedChecksumTypesResponse);
impl_command!((write, Fs, 4): fs::FileClose => fs::FileCloseResponse);

impl_command!((write, Shell, 0): shell::ShellExecute<'_> => shell::ShellExecuteResponse);

impl_command!((write, Basic, 0): basic::EraseAppSettings => basic::EraseAppSettingsResponse);

impl_command!((read,  Suit, 0): suit::ManifestList => suit::ManifestListResponse);
impl_command!((read,  Suit, 1): suit::ManifestState => suit::ManifestStateResponse);
impl_command!((write, Suit, 2): suit::EnvelopeUpload<'_> => suit::EnvelopeUploadResponse);

impl_command!((read,  Memfault, 0): memfault::DeviceInfo => memfault::DeviceInfoResponse);
impl_command!((read,  Memfault, 1): memfault::ProjectKey => memfault::ProjectKeyResponse);
