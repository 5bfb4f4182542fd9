use crate::machine::{validate_machine_name, MachineConfig};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// The machine configurations composing one workspace environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentDescriptor {
    pub name: String,
    #[serde(default)]
    pub machines: Vec<MachineConfig>,
}

impl EnvironmentDescriptor {
    pub fn new(name: impl Into<String>, machines: Vec<MachineConfig>) -> Self {
        Self {
            name: name.into(),
            machines,
        }
    }

    pub fn dev_machine(&self) -> Option<&MachineConfig> {
        self.machines.iter().find(|m| m.dev)
    }

    pub fn machine(&self, name: &str) -> Option<&MachineConfig> {
        self.machines.iter().find(|m| m.name == name)
    }

    /// Structural checks on machine names and sources. Dependency and
    /// resource semantics are left to the producer of the descriptor.
    pub fn check(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for machine in &self.machines {
            validate_machine_name(&machine.name)?;
            machine.source.validate(&machine.name)?;
            if !seen.insert(machine.name.as_str()) {
                return Err(SchemaError::DuplicateMachine(machine.name.clone()));
            }
        }
        Ok(())
    }
}

pub fn parse_descriptor_str(input: &str) -> Result<EnvironmentDescriptor, SchemaError> {
    let descriptor: EnvironmentDescriptor = toml::from_str(input)?;
    descriptor.check()?;
    Ok(descriptor)
}

pub fn parse_descriptor_file(path: impl AsRef<Path>) -> Result<EnvironmentDescriptor, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_descriptor_str(&content)
}
