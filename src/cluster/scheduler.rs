//! Node Scheduler
//!
//! Picks the node (and the failover node) for every operation according to
//! the configured [`SchedulePolicy`].
//!
//! # Policies
//!
//! - **masterSlave**: writes go to the primary only and fail fast while the
//!   primary is marked unreachable. Reads prefer the primary and fall back to
//!   a secondary.
//! - **roundRobin**: every operation goes to `nodes[cursor]`, the cursor
//!   advances by one and wraps. A failed attempt is retried once on the next
//!   node without moving the cursor.
//!
//! The cursor and the per-node marks are atomics, so selection never blocks.

use crate::cluster::{Node, NodeRegistry, NodeRole};
use crate::domain::ports::OperationKind;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Schedule Policy
// =============================================================================

/// Node-selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulePolicy {
    #[serde(rename = "masterSlave", alias = "master_slave")]
    MasterSlave,
    #[serde(rename = "roundRobin", alias = "round_robin")]
    RoundRobin,
}

impl std::fmt::Display for SchedulePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulePolicy::MasterSlave => write!(f, "masterSlave"),
            SchedulePolicy::RoundRobin => write!(f, "roundRobin"),
        }
    }
}

impl std::str::FromStr for SchedulePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "masterslave" | "master_slave" | "master-slave" => Ok(SchedulePolicy::MasterSlave),
            "roundrobin" | "round_robin" | "round-robin" => Ok(SchedulePolicy::RoundRobin),
            other => Err(Error::Configuration(format!("unknown schedule: {}", other))),
        }
    }
}

// =============================================================================
// Node Health
// =============================================================================

/// Reachability and counters for one node
#[derive(Debug, Default)]
struct NodeHealth {
    /// Unix millis when the node was marked unreachable (0 = reachable)
    unreachable_since_ms: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    last_failure: RwLock<Option<(DateTime<Utc>, String)>>,
}

/// Point-in-time view of one node's health
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub id: String,
    pub role: NodeRole,
    pub reachable: bool,
    pub successes: u64,
    pub failures: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_failure: Option<String>,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Per-client node scheduler
#[derive(Debug)]
pub struct Scheduler {
    policy: SchedulePolicy,
    registry: Arc<NodeRegistry>,
    cursor: AtomicUsize,
    health: Vec<NodeHealth>,
    /// Marks older than this count as expired; zero keeps them until cleared
    unreachable_ttl: Duration,
}

impl Scheduler {
    pub fn new(policy: SchedulePolicy, registry: Arc<NodeRegistry>) -> Self {
        let health = registry.nodes().iter().map(|_| NodeHealth::default()).collect();
        Self {
            policy,
            registry,
            cursor: AtomicUsize::new(0),
            health,
            unreachable_ttl: Duration::ZERO,
        }
    }

    pub fn with_unreachable_ttl(mut self, ttl: Duration) -> Self {
        self.unreachable_ttl = ttl;
        self
    }

    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Select the node that serves an operation
    pub fn select_node(&self, kind: OperationKind) -> Result<Arc<Node>> {
        self.plan(kind)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("empty scheduling plan".into()))
    }

    /// Ordered nodes to attempt for one operation
    ///
    /// The first entry is the selected node, the rest are failover targets.
    /// Each call counts as one selection.
    pub fn plan(&self, kind: OperationKind) -> Result<Vec<Arc<Node>>> {
        let plan = match self.policy {
            SchedulePolicy::RoundRobin => self.plan_round_robin(),
            SchedulePolicy::MasterSlave => self.plan_master_slave(kind)?,
        };

        debug!(
            policy = %self.policy,
            operation = %kind,
            nodes = ?plan.iter().map(|n| n.id().as_str()).collect::<Vec<_>>(),
            "Scheduled operation"
        );

        Ok(plan)
    }

    /// Advance the round-robin cursor and return the node it pointed at
    pub fn next_node(&self) -> Arc<Node> {
        let index = self.cursor.fetch_add(1, Ordering::AcqRel) % self.registry.len();
        self.registry.nodes()[index].clone()
    }

    fn plan_round_robin(&self) -> Vec<Arc<Node>> {
        let first = self.next_node();
        let len = self.registry.len();
        if len == 1 {
            return vec![first];
        }
        let retry = self.registry.nodes()[(first.index() + 1) % len].clone();
        vec![first, retry]
    }

    fn plan_master_slave(&self, kind: OperationKind) -> Result<Vec<Arc<Node>>> {
        let primary = self
            .registry
            .primary()
            .cloned()
            .ok_or_else(|| Error::Configuration("masterSlave schedule without a primary".into()))?;

        if self.registry.len() == 1 {
            return Ok(vec![primary]);
        }

        let primary_reachable = self.is_reachable(&primary);

        if kind.is_write() {
            if !primary_reachable {
                return Err(Error::connectivity(
                    primary.id().as_str(),
                    "primary marked unreachable; writes are not routed to secondaries",
                ));
            }
            return Ok(vec![primary]);
        }

        let mut reachable_secondaries = self
            .registry
            .secondaries()
            .filter(|n| self.is_reachable(n))
            .cloned();

        let plan = if primary_reachable {
            let fallback = reachable_secondaries
                .next()
                .or_else(|| self.registry.secondaries().next().cloned());
            std::iter::once(primary).chain(fallback).collect()
        } else {
            match reachable_secondaries.next() {
                Some(first) => {
                    let retry = reachable_secondaries.next().unwrap_or(primary);
                    vec![first, retry]
                }
                // Every node is marked; the primary is still the best guess
                None => std::iter::once(primary)
                    .chain(self.registry.secondaries().next().cloned())
                    .collect(),
            }
        };

        Ok(plan)
    }

    // =========================================================================
    // Health Feedback
    // =========================================================================

    /// Record a failed attempt against a node
    ///
    /// Only connectivity-class errors mark the node unreachable.
    pub fn report_failure(&self, node: &Node, error: &Error) {
        let Some(health) = self.health.get(node.index()) else {
            return;
        };
        health.failures.fetch_add(1, Ordering::Relaxed);
        *health.last_failure.write() = Some((Utc::now(), error.to_string()));

        if error.is_retryable() {
            let now = now_ms();
            let previous = health.unreachable_since_ms.swap(now, Ordering::AcqRel);
            if previous == 0 {
                warn!(node = %node.id(), role = %node.role(), error = %error, "Node marked unreachable");
            }
        }
    }

    /// Record a successful attempt; clears any unreachable mark
    pub fn report_success(&self, node: &Node) {
        let Some(health) = self.health.get(node.index()) else {
            return;
        };
        health.successes.fetch_add(1, Ordering::Relaxed);
        if health.unreachable_since_ms.swap(0, Ordering::AcqRel) != 0 {
            info!(node = %node.id(), "Node reachable again");
        }
    }

    /// Mark a node unreachable by ID
    pub fn mark_unreachable(&self, id: &str) -> Result<()> {
        let node = self.lookup(id)?;
        self.health[node.index()]
            .unreachable_since_ms
            .store(now_ms(), Ordering::Release);
        Ok(())
    }

    /// Clear the unreachable mark of a node by ID
    pub fn mark_reachable(&self, id: &str) -> Result<()> {
        let node = self.lookup(id)?;
        self.health[node.index()]
            .unreachable_since_ms
            .store(0, Ordering::Release);
        Ok(())
    }

    /// Check whether a node is currently considered reachable
    pub fn is_reachable(&self, node: &Node) -> bool {
        let Some(health) = self.health.get(node.index()) else {
            return false;
        };
        let since = health.unreachable_since_ms.load(Ordering::Acquire);
        if since == 0 {
            return true;
        }
        if self.unreachable_ttl.is_zero() {
            return false;
        }
        now_ms().saturating_sub(since) >= self.unreachable_ttl.as_millis() as u64
    }

    /// Health snapshot for every node, in registry order
    pub fn stats(&self) -> Vec<NodeStats> {
        self.registry
            .nodes()
            .iter()
            .zip(&self.health)
            .map(|(node, health)| {
                let last = health.last_failure.read().clone();
                NodeStats {
                    id: node.id().to_string(),
                    role: node.role(),
                    reachable: self.is_reachable(node),
                    successes: health.successes.load(Ordering::Relaxed),
                    failures: health.failures.load(Ordering::Relaxed),
                    last_failure_at: last.as_ref().map(|(at, _)| *at),
                    last_failure: last.map(|(_, msg)| msg),
                }
            })
            .collect()
    }

    fn lookup(&self, id: &str) -> Result<&Arc<Node>> {
        self.registry
            .find(id)
            .ok_or_else(|| Error::Configuration(format!("unknown node: {}", id)))
    }
}

fn now_ms() -> u64 {
    // Never 0, which is reserved for "reachable"
    (Utc::now().timestamp_millis() as u64).max(1)
}
