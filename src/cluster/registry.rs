//! Node Registry
//!
//! Validated, immutable set of storage nodes. Built once when the client is
//! constructed; concurrent reads need no locking.

use crate::cluster::SchedulePolicy;
use crate::config::{ClientConfig, Credentials};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

// =============================================================================
// Node ID
// =============================================================================

/// Unique identifier for a node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Node Role
// =============================================================================

/// Role of a node under the masterSlave schedule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Authoritative for writes
    Primary,
    /// Serves reads as fallback
    Secondary,
    /// Untagged (roundRobin)
    #[default]
    Unranked,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Secondary => write!(f, "secondary"),
            NodeRole::Unranked => write!(f, "unranked"),
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// One storage endpoint
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    index: usize,
    endpoint: String,
    role: NodeRole,
    weight: Option<u32>,
    path_style: bool,
    credentials: Option<Credentials>,
}

impl Node {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Position in registry order
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Configured weight, carried for reporting only
    ///
    /// Scheduling ignores it: round robin rotates evenly and masterSlave
    /// picks by role.
    pub fn weight(&self) -> Option<u32> {
        self.weight
    }

    pub fn path_style(&self) -> bool {
        self.path_style
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}

// =============================================================================
// Node Registry
// =============================================================================

/// Immutable registry of configured nodes
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: Vec<Arc<Node>>,
    primary: Option<usize>,
}

impl NodeRegistry {
    /// Build and validate the registry for a client config
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let policy = config.effective_schedule();
        let mut nodes = Vec::with_capacity(config.nodes.len());
        let mut seen = HashSet::new();

        for (index, node) in config.nodes.iter().enumerate() {
            let id = node
                .id
                .clone()
                .unwrap_or_else(|| format!("node-{}", index));

            if !seen.insert(id.clone()) {
                return Err(Error::Configuration(format!("duplicate node id: {}", id)));
            }
            if node.endpoint.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "node {} has an empty endpoint",
                    id
                )));
            }

            nodes.push(Arc::new(Node {
                id: NodeId::new(id),
                index,
                endpoint: node.endpoint.trim().to_string(),
                role: node.role,
                weight: node.weight,
                path_style: node.path_style,
                credentials: node.credentials.clone(),
            }));
        }

        Self::new(nodes, policy)
    }

    fn new(nodes: Vec<Arc<Node>>, policy: SchedulePolicy) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::Configuration("node registry requires at least one node".into()));
        }

        let primaries: Vec<usize> = nodes
            .iter()
            .filter(|n| n.role == NodeRole::Primary)
            .map(|n| n.index)
            .collect();

        let primary = match (policy, nodes.len()) {
            // A lone node is the primary whatever its tag says
            (_, 1) => Some(0),
            (SchedulePolicy::MasterSlave, _) => match primaries.as_slice() {
                [index] => Some(*index),
                [] => {
                    return Err(Error::Configuration(
                        "masterSlave schedule requires one primary node".into(),
                    ))
                }
                _ => {
                    return Err(Error::Configuration(format!(
                        "masterSlave schedule allows one primary node, found {}",
                        primaries.len()
                    )))
                }
            },
            (SchedulePolicy::RoundRobin, _) => None,
        };

        Ok(Self { nodes, primary })
    }

    /// All nodes in registry order
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Node>> {
        self.nodes.get(index)
    }

    pub fn find(&self, id: &str) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|n| n.id.as_str() == id)
    }

    /// Primary node; `None` for multi-node roundRobin registries
    pub fn primary(&self) -> Option<&Arc<Node>> {
        self.primary.map(|i| &self.nodes[i])
    }

    /// Every node other than the primary, in registry order
    pub fn secondaries(&self) -> impl Iterator<Item = &Arc<Node>> {
        let primary = self.primary;
        self.nodes.iter().filter(move |n| Some(n.index) != primary)
    }
}
