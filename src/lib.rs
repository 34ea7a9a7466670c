//! OSS Cluster Client
//!
//! Object storage client for a bucket served by one node or by a cluster of
//! nodes. Requests are routed by a scheduling policy and fail over to another
//! node when a node is unreachable.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          OssClient                             │
//! │   upload · download · createDownloadStream · url · remove      │
//! ├───────────────────────────────────────────────────────────────┤
//! │                          Scheduler                             │
//! │   masterSlave | roundRobin      health marks      failover     │
//! │                              │                                 │
//! │                    ┌─────────┴─────────┐                       │
//! │                    │   Node Registry   │                       │
//! │                    └───────────────────┘                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │                        Node Backends                           │
//! │   ┌───────────────────────┐    ┌───────────────────────────┐   │
//! │   │   HTTP (OSS REST)     │    │   Memory (in-process)     │   │
//! │   └───────────────────────┘    └───────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`client`]: client facade
//! - [`cluster`]: node registry, scheduler and health monitor
//! - [`backends`]: node backend adapters
//! - [`config`]: client configuration
//! - [`domain`]: core types and the backend port
//! - [`error`]: error types and handling

pub mod backends;
pub mod client;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use backends::{
    AnonymousSigner, BackendFactory, HttpBackend, MemoryBackend, ObjectStore, RequestSigner,
    SignerFactory,
};

pub use client::{create, OssClient};

pub use cluster::{
    HealthMonitor, Node, NodeId, NodeRegistry, NodeRole, NodeStats, SchedulePolicy, Scheduler,
};

pub use config::{BucketMode, ClientConfig, Credentials, HealthCheckConfig, NodeConfig};

pub use domain::ports::{
    ObjectBackend, ObjectBackendRef, ObjectHeaders, ObjectMeta, ObjectStream, OperationKind,
    UploadOptions, UploadResult,
};

pub use error::{Error, ErrorKind, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
