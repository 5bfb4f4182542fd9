use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A command to execute inside a running machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub command_line: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Command {
    pub fn new(
        name: impl Into<String>,
        command_line: impl Into<String>,
        command_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            command_line: command_line.into(),
            command_type: command_type.into(),
            attributes: BTreeMap::new(),
        }
    }
}
