use serde::{Deserialize, Serialize};

use crate::commands::macros::{
    impl_deserialize_from_empty_map_and_into_unit, impl_serialize_as_empty_map,
};

/// Run test command
#[derive(Debug, Default, Serialize, Eq, PartialEq)]
pub struct RunTest<'a> {
    /// name of the test to run; all tests when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testname: Option<&'a str>,
    /// token echoed into the test log
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<&'a str>,
}

/// Response for [`RunTest`] command
#[derive(Default, Debug, Eq, PartialEq)]
pub struct RunTestResponse;
impl_deserialize_from_empty_map_and_into_unit!(RunTestResponse);

/// Run list command
#[derive(Debug, Eq, PartialEq)]
pub struct RunList;
impl_serialize_as_empty_map!(RunList);

/// Response for [`RunList`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct RunListResponse {
    /// names of all registered tests
    pub run_list: Vec<String>,
}
