//! Cluster Module
//!
//! Node registry, scheduling policies and failover bookkeeping shared by
//! single-region and multi-node clients.

pub mod health;
pub mod registry;
pub mod scheduler;

pub use health::{probe_once, HealthMonitor};
pub use registry::{Node, NodeId, NodeRegistry, NodeRole};
pub use scheduler::{NodeStats, SchedulePolicy, Scheduler};
