use std::fmt::Display;

use strum_macros::{Display as StrumDisplay, FromRepr};

use crate::Group;

/// General SMP return code, decoded from the `rc` response field.
///
/// The table matches the modern management error codes; values outside it
/// are preserved as [`ReturnCode::Unrecognized`] rather than dropped, since
/// devices in the wild speak both the legacy and the extended table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReturnCode {
    /// No error (success)
    Ok,
    /// Unknown error
    Unknown,
    /// Insufficient memory
    NoMemory,
    /// Error in input value
    InValue,
    /// Operation timed out on the device
    Timeout,
    /// No such file or entry
    NoEntry,
    /// Current state disallows the command
    BadState,
    /// Response too large
    ResponseTooLong,
    /// Command not supported
    NotSupported,
    /// Corrupt payload
    CorruptPayload,
    /// Device busy with another command
    Busy,
    /// Access denied
    AccessDenied,
    /// A code outside the recognized table
    Unrecognized(u64),
}

impl ReturnCode {
    /// Decodes a raw `rc` value.
    pub fn from_raw(rc: u64) -> Self {
        match rc {
            0 => ReturnCode::Ok,
            1 => ReturnCode::Unknown,
            2 => ReturnCode::NoMemory,
            3 => ReturnCode::InValue,
            4 => ReturnCode::Timeout,
            5 => ReturnCode::NoEntry,
            6 => ReturnCode::BadState,
            7 => ReturnCode::ResponseTooLong,
            8 => ReturnCode::NotSupported,
            9 => ReturnCode::CorruptPayload,
            10 => ReturnCode::Busy,
            11 => ReturnCode::AccessDenied,
            raw => ReturnCode::Unrecognized(raw),
        }
    }

    /// The raw numeric value.
    pub fn raw(self) -> u64 {
        match self {
            ReturnCode::Ok => 0,
            ReturnCode::Unknown => 1,
            ReturnCode::NoMemory => 2,
            ReturnCode::InValue => 3,
            ReturnCode::Timeout => 4,
            ReturnCode::NoEntry => 5,
            ReturnCode::BadState => 6,
            ReturnCode::ResponseTooLong => 7,
            ReturnCode::NotSupported => 8,
            ReturnCode::CorruptPayload => 9,
            ReturnCode::Busy => 10,
            ReturnCode::AccessDenied => 11,
            ReturnCode::Unrecognized(raw) => raw,
        }
    }

    /// Whether this code signals success.
    pub fn is_success(self) -> bool {
        self == ReturnCode::Ok
    }
}

impl Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReturnCode::Unrecognized(raw) => write!(f, "Unrecognized({raw})"),
            other => write!(f, "{other:?}({})", other.raw()),
        }
    }
}

/// A group based error from the version 2 `err` response structure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GroupError {
    /// group the error code belongs to
    pub group: u16,
    /// group based error code
    pub rc: u64,
}

impl GroupError {
    /// Whether this entry signals success.
    pub fn is_success(self) -> bool {
        self.rc == 0
    }
}

fn group_code_name(group: u16, rc: u64) -> Option<String> {
    match Group::from_repr(group)? {
        Group::Os => OsError::from_repr(rc).map(|code| code.to_string()),
        Group::Image => ImageError::from_repr(rc).map(|code| code.to_string()),
        Group::Settings => SettingsError::from_repr(rc).map(|code| code.to_string()),
        Group::Fs => FsError::from_repr(rc).map(|code| code.to_string()),
        Group::Shell => ShellError::from_repr(rc).map(|code| code.to_string()),
        Group::Basic => BasicError::from_repr(rc).map(|code| code.to_string()),
        _ => None,
    }
}

impl Display for GroupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let group_name = Group::name_for(self.group);
        match group_code_name(self.group, self.rc) {
            Some(name) => write!(f, "{group_name}: {name}"),
            None => write!(f, "{group_name}: Unrecognized({})", self.rc),
        }
    }
}

/// OS group error codes.
#[derive(FromRepr, StrumDisplay, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u64)]
#[allow(missing_docs)]
pub enum OsError {
    Ok = 0,
    Unknown,
    InvalidFormat,
    QueryYieldsNoAnswer,
    RtcNotSet,
    RtcCommandFailed,
    QueryResponseValueNotValid,
}

/// Image group error codes.
#[derive(FromRepr, StrumDisplay, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u64)]
#[allow(missing_docs)]
pub enum ImageError {
    Ok = 0,
    Unknown,
    FlashConfigQueryFail,
    NoImage,
    NoTlvs,
    InvalidTlv,
    TlvMultipleHashesFound,
    TlvInvalidSize,
    HashNotFound,
    NoFreeSlot,
    FlashOpenFailed,
    FlashReadFailed,
    FlashWriteFailed,
    FlashEraseFailed,
    InvalidSlot,
    NoFreeMemory,
    FlashContextAlreadySet,
    FlashContextNotSet,
    FlashAreaDeviceNull,
    InvalidPageOffset,
    InvalidOffset,
    InvalidLength,
    InvalidImageHeader,
    InvalidImageHeaderMagic,
    InvalidHash,
    InvalidFlashAddress,
    VersionGetFailed,
    CurrentVersionIsNewer,
    ImageAlreadyPending,
    InvalidImageVectorTable,
    InvalidImageTooLarge,
    InvalidImageDataOverrun,
    ImageConfirmationDenied,
    ImageSettingTestToActiveDenied,
    ActiveSlotNotKnown,
}

/// Settings group error codes.
#[derive(FromRepr, StrumDisplay, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u64)]
#[allow(missing_docs)]
pub enum SettingsError {
    Ok = 0,
    Unknown,
    KeyTooLong,
    KeyNotFound,
    ReadNotSupported,
    RootKeyNotFound,
    WriteNotSupported,
    DeleteNotSupported,
    SaveNotSupported,
}

/// File system group error codes.
#[derive(FromRepr, StrumDisplay, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u64)]
#[allow(missing_docs)]
pub enum FsError {
    Ok = 0,
    Unknown,
    FileInvalidName,
    FileNotFound,
    FileIsDirectory,
    FileOpenFailed,
    FileSeekFailed,
    FileReadFailed,
    FileTruncateFailed,
    FileDeleteFailed,
    FileWriteFailed,
    FileOffsetNotValid,
    FileOffsetLargerThanFile,
    ChecksumHashNotFound,
    MountPointNotFound,
    ReadOnlyFilesystem,
    FileEmpty,
}

/// Shell group error codes.
#[derive(FromRepr, StrumDisplay, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u64)]
#[allow(missing_docs)]
pub enum ShellError {
    Ok = 0,
    Unknown,
    CommandTooLong,
    EmptyCommand,
}

/// Basic group error codes.
#[derive(FromRepr, StrumDisplay, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u64)]
#[allow(missing_docs)]
pub enum BasicError {
    Ok = 0,
    Unknown,
    FlashOpenFailed,
    FlashConfigQueryFail,
    FlashEraseFailed,
}
