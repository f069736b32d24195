use serde::{Deserialize, Serialize};

/// Shell command line execute command
#[derive(Debug, Serialize, Eq, PartialEq)]
pub struct ShellExecute<'a> {
    /// the command line, split into arguments
    pub argv: Vec<&'a str>,
}

/// Response for [`ShellExecute`] command
#[derive(Debug, Deserialize, Eq, PartialEq)]
pub struct ShellExecuteResponse {
    /// command output
    pub o: String,
    /// command return code
    pub ret: Option<i32>,
}
