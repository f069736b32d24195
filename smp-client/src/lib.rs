#![deny(missing_docs)]
#![deny(unreachable_pub)]
#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

/// A high level client for SMP device management
pub mod client;
pub use client::SmpClient;

/// SMP command group definitions
pub mod commands;

/// SMP protocol layer: correlated request dispatch and response collection
pub mod connection;

/// 8-byte SMP header codec
pub mod header;

/// Scheme-dependent packet assembly and parsing
pub mod packet;

/// Sequence number allocation and response re-ordering
pub mod rob;

/// SMP return code tables
pub mod return_codes;

/// SUIT envelope upload
pub mod suit;

/// SMP transport layer contract and adapters
pub mod transport;

/// Chunked image upload engine
pub mod upload;

/// Firmware upgrade state machine
pub mod upgrade;

/// SMP command group identifiers with their stable numeric codes.
///
/// Groups from 64 upwards are reserved for per-user (vendor) extensions;
/// the SUIT and Memfault groups used by this crate live in that range.
#[derive(strum_macros::FromRepr, strum_macros::Display, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum Group {
    Os = 0,
    Image = 1,
    Stats = 2,
    Settings = 3,
    Logs = 4,
    Crash = 5,
    Split = 6,
    Run = 7,
    Fs = 8,
    Shell = 9,
    Basic = 63,
    Memfault = 64,
    Suit = 66,
}

/// First group id of the per-user (vendor) range.
pub const PER_USER_GROUP_BASE: u16 = 64;

impl Group {
    /// The numeric group code as carried in the SMP header.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Converts a raw group id to a display string, labelling unknown ids in
    /// the vendor range as per-user groups.
    pub fn name_for(group_id: u16) -> String {
        match Self::from_repr(group_id) {
            Some(group) => format!("{group}"),
            None if group_id >= PER_USER_GROUP_BASE => format!("PerUser({group_id})"),
            None => format!("Unknown({group_id})"),
        }
    }
}
