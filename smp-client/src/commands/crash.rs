use crate::commands::macros::{
    impl_deserialize_from_empty_map_and_into_unit, impl_serialize_as_empty_map,
};

/// Crash test command, asks the device to trigger a crash for testing the
/// core dump machinery
#[derive(Debug, Eq, PartialEq)]
pub struct CrashTest;
impl_serialize_as_empty_map!(CrashTest);

/// Response for [`CrashTest`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct CrashTestResponse;
impl_deserialize_from_empty_map_and_into_unit!(CrashTestResponse);

#[cfg(test)]
mod tests {
    use super::super::macros::command_encode_decode_test;
    use super::*;
    use ciborium::cbor;

    command_encode_decode_test! {
        crash_test,
        (2, 5, 0),
        CrashTest,
        cbor!({}),
        cbor!({}),
        CrashTestResponse,
    }
}
