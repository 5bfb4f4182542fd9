use crate::types::{MachineId, WorkspaceId};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Descriptor used to materialize a machine: an image reference, a script
/// location, or inline content. Exactly one of `location` and `content` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MachineSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl MachineSource {
    pub fn with_location(source_type: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            location: Some(location.into()),
            content: None,
        }
    }

    pub fn with_content(source_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            location: None,
            content: Some(content.into()),
        }
    }

    pub fn validate(&self, machine: &str) -> Result<(), SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidSource {
            machine: machine.to_owned(),
            reason: reason.to_owned(),
        };
        if self.source_type.trim().is_empty() {
            return Err(invalid("source type must not be empty"));
        }
        match (&self.location, &self.content) {
            (Some(_), Some(_)) => Err(invalid("location and content are mutually exclusive")),
            (None, None) => Err(invalid("one of location or content is required")),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for MachineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.location, &self.content) {
            (Some(location), _) => write!(f, "{}:{location}", self.source_type),
            (None, Some(_)) => write!(f, "{}:<inline>", self.source_type),
            (None, None) => write!(f, "{}:<empty>", self.source_type),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MachineLimits {
    /// Memory limit in megabytes. Zero means "use the engine default".
    #[serde(default)]
    pub ram_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConf {
    #[serde(rename = "ref")]
    pub reference: String,
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Immutable configuration of one machine within an environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MachineConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub machine_type: String,
    pub source: MachineSource,
    #[serde(default)]
    pub limits: MachineLimits,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerConf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub dev: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Link references in `service[:alias]` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    /// Shared-volume references in `service[:mode]` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes_from: Vec<String>,
}

impl MachineConfig {
    pub fn new(
        name: impl Into<String>,
        machine_type: impl Into<String>,
        source: MachineSource,
    ) -> Self {
        Self {
            name: name.into(),
            machine_type: machine_type.into(),
            source,
            limits: MachineLimits::default(),
            servers: Vec::new(),
            env: BTreeMap::new(),
            dev: false,
            depends_on: Vec::new(),
            links: Vec::new(),
            volumes_from: Vec::new(),
        }
    }

    #[must_use]
    pub fn dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    #[must_use]
    pub fn ram_mb(mut self, ram_mb: u64) -> Self {
        self.limits.ram_mb = ram_mb;
        self
    }

    #[must_use]
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    /// Whether any dependency relation is declared on this machine.
    pub fn has_relations(&self) -> bool {
        !self.depends_on.is_empty() || !self.links.is_empty() || !self.volumes_from.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    Creating,
    Running,
    Destroying,
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineStatus::Creating => write!(f, "CREATING"),
            MachineStatus::Running => write!(f, "RUNNING"),
            MachineStatus::Destroying => write!(f, "DESTROYING"),
        }
    }
}

/// Descriptor of a machine that may not be realized yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Machine {
    pub id: MachineId,
    pub workspace_id: WorkspaceId,
    pub env_name: String,
    pub owner: String,
    pub config: MachineConfig,
    pub status: MachineStatus,
}

impl Machine {
    pub fn new(
        id: MachineId,
        workspace_id: WorkspaceId,
        env_name: impl Into<String>,
        owner: impl Into<String>,
        config: MachineConfig,
    ) -> Self {
        Self {
            id,
            workspace_id,
            env_name: env_name.into(),
            owner: owner.into(),
            config,
            status: MachineStatus::Creating,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: MachineStatus) -> Self {
        self.status = status;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_dev(&self) -> bool {
        self.config.dev
    }
}

/// Machine names follow `^/?[a-zA-Z0-9_-]+$`.
pub fn validate_machine_name(name: &str) -> Result<(), SchemaError> {
    let body = name.strip_prefix('/').unwrap_or(name);
    if body.is_empty()
        || !body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(SchemaError::InvalidMachineName(name.to_owned()));
    }
    Ok(())
}
