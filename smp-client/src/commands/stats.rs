use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::commands::macros::impl_serialize_as_empty_map;

/// Statistics read command, fetches all entries of one statistics group
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct StatisticsRead<'a> {
    /// name of the statistics group
    pub name: &'a str,
}

/// Response for [`StatisticsRead`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct StatisticsReadResponse {
    /// name of the statistics group
    pub name: String,
    /// entries keyed by statistic name
    pub fields: HashMap<String, u64>,
}

/// Statistics list command
#[derive(Debug, Eq, PartialEq)]
pub struct StatisticsList;
impl_serialize_as_empty_map!(StatisticsList);

/// Response for [`StatisticsList`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct StatisticsListResponse {
    /// names of all statistics groups on the device
    pub stat_list: Vec<String>,
}
