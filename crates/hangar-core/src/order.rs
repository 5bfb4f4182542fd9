//! Start-order resolution over declared machine dependencies.
//!
//! weight(node) = 0 without dependencies, else 1 + the maximum weight of its
//! dependencies. Weights are computed by fixed-point relaxation over the
//! pending set; a full scan that weights nothing means the remaining nodes
//! form a cycle.

use hangar_schema::MachineConfig;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("service '{0}' depends on itself")]
    SelfDependency(String),
    #[error("service '{node}' depends on unknown service '{dependency}'")]
    UnknownDependency { node: String, dependency: String },
    #[error("service '{node}' has malformed reference '{reference}'")]
    MalformedReference { node: String, reference: String },
    #[error("services {} form a dependency cycle", .0.join(", "))]
    Cycle(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceNode {
    pub name: String,
    pub depends_on: Vec<String>,
    /// `service[:alias]`
    pub links: Vec<String>,
    /// `service[:mode]`
    pub volumes_from: Vec<String>,
}

impl ServiceNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
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

    #[must_use]
    pub fn links<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.links = refs.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn volumes_from<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.volumes_from = refs.into_iter().map(Into::into).collect();
        self
    }

    /// Dependency names from all three relations, deduplicated in declaration order.
    pub fn dependencies(&self) -> Result<Vec<String>, OrderError> {
        let mut deps: Vec<String> = Vec::new();
        let referenced = self
            .links
            .iter()
            .chain(&self.volumes_from)
            .map(|r| parse_reference(&self.name, r));
        for dep in self.depends_on.iter().cloned().map(Ok).chain(referenced) {
            let dep = dep?;
            if dep == self.name {
                return Err(OrderError::SelfDependency(self.name.clone()));
            }
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        Ok(deps)
    }
}

impl From<&MachineConfig> for ServiceNode {
    fn from(config: &MachineConfig) -> Self {
        Self {
            name: config.name.clone(),
            depends_on: config.depends_on.clone(),
            links: config.links.clone(),
            volumes_from: config.volumes_from.clone(),
        }
    }
}

pub fn nodes_from_configs(configs: &[MachineConfig]) -> Vec<ServiceNode> {
    configs.iter().map(ServiceNode::from).collect()
}

fn parse_reference(node: &str, reference: &str) -> Result<String, OrderError> {
    let mut parts = reference.split(':');
    let name = parts.next().unwrap_or_default();
    parts.next();
    if parts.next().is_some() || name.is_empty() {
        return Err(OrderError::MalformedReference {
            node: node.to_owned(),
            reference: reference.to_owned(),
        });
    }
    Ok(name.to_owned())
}

/// Weight of every node, indexed like `nodes`.
pub fn compute_weights(nodes: &[ServiceNode]) -> Result<Vec<usize>, OrderError> {
    let mut deps = Vec::with_capacity(nodes.len());
    for node in nodes {
        deps.push(node.dependencies()?);
    }

    let declared: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
    for (node, node_deps) in nodes.iter().zip(&deps) {
        if let Some(unknown) = node_deps.iter().find(|d| !declared.contains(d.as_str())) {
            return Err(OrderError::UnknownDependency {
                node: node.name.clone(),
                dependency: unknown.clone(),
            });
        }
    }

    let mut weights: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    let mut pending: Vec<usize> = (0..nodes.len()).collect();
    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|&i| {
            let mut weight = 0;
            for dep in &deps[i] {
                match weights.get(dep.as_str()) {
                    Some(w) => weight = weight.max(w + 1),
                    None => return true,
                }
            }
            weights.insert(nodes[i].name.as_str(), weight);
            false
        });
        if pending.len() == before {
            return Err(OrderError::Cycle(
                pending.iter().map(|&i| nodes[i].name.clone()).collect(),
            ));
        }
    }

    Ok(nodes
        .iter()
        .map(|n| weights.get(n.name.as_str()).copied().unwrap_or_default())
        .collect())
}

/// Start order of an environment's machines. Without any relations the dev
/// machine goes first and the rest keep declaration order; otherwise machines
/// sort by weight with the dev machine first among equals.
pub fn machine_start_order(configs: &[MachineConfig]) -> Result<Vec<MachineConfig>, OrderError> {
    if !configs.iter().any(MachineConfig::has_relations) {
        let (dev, rest): (Vec<_>, Vec<_>) = configs.iter().cloned().partition(|m| m.dev);
        return Ok(dev.into_iter().chain(rest).collect());
    }
    let weights = compute_weights(&nodes_from_configs(configs))?;
    let mut order: Vec<usize> = (0..configs.len()).collect();
    order.sort_by_key(|&i| (weights[i], !configs[i].dev));
    Ok(order.into_iter().map(|i| configs[i].clone()).collect())
}

/// Nodes sorted by ascending weight; equal weights keep declaration order.
pub fn resolve_start_order(nodes: &[ServiceNode]) -> Result<Vec<ServiceNode>, OrderError> {
    let weights = compute_weights(nodes)?;
    let mut indexed: Vec<usize> = (0..nodes.len()).collect();
    indexed.sort_by_key(|&i| weights[i]);
    Ok(indexed.into_iter().map(|i| nodes[i].clone()).collect())
}
