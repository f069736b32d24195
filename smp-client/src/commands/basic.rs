use crate::commands::macros::{
    impl_deserialize_from_empty_map_and_into_unit, impl_serialize_as_empty_map,
};

/// Erase app settings command, wipes the application settings partition
#[derive(Debug, Eq, PartialEq)]
pub struct EraseAppSettings;
impl_serialize_as_empty_map!(EraseAppSettings);

/// Response for [`EraseAppSettings`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct EraseAppSettingsResponse;
impl_deserialize_from_empty_map_and_into_unit!(EraseAppSettingsResponse);
