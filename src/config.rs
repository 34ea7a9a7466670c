//! Client Configuration
//!
//! A single [`ClientConfig`] describes both the single-region client (one node,
//! no schedule) and cluster clients (several nodes plus a [`SchedulePolicy`]).
//! Configs are deserialized from JSON or YAML, or built in code, and are
//! validated once when the client is constructed.

use crate::cluster::{NodeRole, SchedulePolicy};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the configured bucket
pub const BUCKET_ENV: &str = "OSS_CNPM_BUCKET";

/// Default region host segment used for public URLs
pub const DEFAULT_REGION: &str = "oss-cn-hangzhou";

/// Default Cache-Control header applied to uploads
pub const DEFAULT_CACHE_CONTROL: &str = "max-age=0, s-maxage=60";

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_cache_control() -> Option<String> {
    Some(DEFAULT_CACHE_CONTROL.to_string())
}

fn default_unreachable_ttl_secs() -> u64 {
    30
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_probe_key() -> String {
    "_oss-cluster/check.status.txt".to_string()
}

// =============================================================================
// Bucket Mode
// =============================================================================

/// Bucket access mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketMode {
    /// Objects are publicly readable; uploads report their URL
    Public,
    #[default]
    Private,
}

impl BucketMode {
    pub fn is_public(&self) -> bool {
        matches!(self, BucketMode::Public)
    }
}

// =============================================================================
// Node Configuration
// =============================================================================

/// Access credentials for a node
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_key_id: String,
    pub access_key_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .finish()
    }
}

/// Configuration for one storage node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Node ID; defaults to `node-<index>`
    #[serde(default)]
    pub id: Option<String>,
    /// Endpoint, e.g. `http://oss-cn-hangzhou.aliyuncs.com`
    pub endpoint: String,
    /// Role under the masterSlave schedule
    #[serde(default)]
    pub role: NodeRole,
    /// Relative weight; informational, never used for scheduling
    #[serde(default)]
    pub weight: Option<u32>,
    /// Address the bucket as a path segment instead of a host prefix
    #[serde(default)]
    pub path_style: bool,
    /// Handed to the signer factory; requests are unsigned without one
    #[serde(flatten)]
    pub credentials: Option<Credentials>,
}

impl NodeConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            id: None,
            endpoint: endpoint.into(),
            role: NodeRole::default(),
            weight: None,
            path_style: false,
            credentials: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn path_style(mut self, path_style: bool) -> Self {
        self.path_style = path_style;
        self
    }

    pub fn credentials(
        mut self,
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
        });
        self
    }
}

// =============================================================================
// Health Check Configuration
// =============================================================================

/// Background node probing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    /// Object probed with HEAD; an absent object still proves the node answers
    #[serde(default = "default_probe_key")]
    pub probe_key: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_health_interval_secs(),
            probe_key: default_probe_key(),
        }
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Complete client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Bucket name; may be left out when `OSS_CNPM_BUCKET` supplies it
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub mode: BucketMode,
    /// Region host segment used for URLs
    #[serde(default = "default_region")]
    pub region: String,
    /// Node-selection policy; required when more than one node is configured
    #[serde(default)]
    pub schedule: Option<SchedulePolicy>,
    pub nodes: Vec<NodeConfig>,
    /// Per-operation timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Default Cache-Control for uploads; `null` disables it
    #[serde(default = "default_cache_control")]
    pub cache_control: Option<String>,
    /// Seconds before an unreachable mark expires (0 = until cleared)
    #[serde(default = "default_unreachable_ttl_secs")]
    pub unreachable_ttl_secs: u64,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

impl ClientConfig {
    /// Single-region client with one node
    pub fn single(bucket: impl Into<String>, node: NodeConfig) -> Self {
        Self {
            bucket: bucket.into(),
            mode: BucketMode::default(),
            region: default_region(),
            schedule: None,
            nodes: vec![node],
            timeout_ms: default_timeout_ms(),
            cache_control: default_cache_control(),
            unreachable_ttl_secs: default_unreachable_ttl_secs(),
            health_check: HealthCheckConfig::default(),
        }
    }

    /// Cluster client over several nodes
    pub fn cluster(
        bucket: impl Into<String>,
        schedule: SchedulePolicy,
        nodes: Vec<NodeConfig>,
    ) -> Self {
        Self {
            schedule: Some(schedule),
            nodes,
            ..Self::single(bucket, NodeConfig::new(""))
        }
    }

    pub fn mode(mut self, mode: BucketMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn schedule(mut self, schedule: SchedulePolicy) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Per-operation timeout
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Effective schedule; single-node clients behave the same under either policy
    pub fn effective_schedule(&self) -> SchedulePolicy {
        self.schedule.unwrap_or(SchedulePolicy::RoundRobin)
    }

    /// Host serving public object URLs, e.g. `bucket.oss-cn-hangzhou.aliyuncs.com`
    pub fn public_host(&self) -> String {
        format!("{}.{}.aliyuncs.com", self.bucket, self.region)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::Configuration("bucket must not be empty".into()));
        }
        if self.region.trim().is_empty() {
            return Err(Error::Configuration("region must not be empty".into()));
        }
        if self.nodes.is_empty() {
            return Err(Error::Configuration("at least one node is required".into()));
        }
        if self.nodes.len() > 1 && self.schedule.is_none() {
            return Err(Error::Configuration(format!(
                "{} nodes configured but no schedule given (masterSlave or roundRobin)",
                self.nodes.len()
            )));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Configuration("timeoutMs must be positive".into()));
        }
        if self.health_check.enabled && self.health_check.interval_secs == 0 {
            return Err(Error::Configuration(
                "healthCheck.intervalSecs must be positive".into(),
            ));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if node.endpoint.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "node {} has an empty endpoint",
                    node.id.clone().unwrap_or_else(|| index.to_string())
                )));
            }
        }
        Ok(())
    }

    /// Parse a JSON config
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Parse a YAML config
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Load a config file; `.json` is parsed as JSON, anything else as YAML
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_yaml_str(&contents),
        }
    }

    /// Load a config file, then apply environment overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env();
        Ok(config)
    }

    /// Apply `OSS_CNPM_BUCKET` if set
    pub fn apply_env(&mut self) {
        if let Ok(bucket) = std::env::var(BUCKET_ENV) {
            if !bucket.trim().is_empty() {
                self.bucket = bucket;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_yaml_cluster_config() {
        let yaml = r#"
bucket: cnpm-test
mode: public
schedule: masterSlave
nodes:
  - id: hz-a
    endpoint: http://oss-cn-hangzhou.aliyuncs.com
    role: primary
    accessKeyId: ak
    accessKeySecret: sk
  - id: hz-b
    endpoint: http://oss-cn-hangzhou-b.aliyuncs.com
    role: secondary
"#;
        let config = ClientConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.bucket, "cnpm-test");
        assert!(config.mode.is_public());
        assert_eq!(config.schedule, Some(SchedulePolicy::MasterSlave));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].role, NodeRole::Primary);
        assert_eq!(
            config.nodes[0].credentials.as_ref().map(|c| c.access_key_id.as_str()),
            Some("ak")
        );
        assert!(config.nodes[1].credentials.is_none());
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.cache_control.as_deref(), Some(DEFAULT_CACHE_CONTROL));
        assert_eq!(config.operation_timeout(), Duration::from_secs(60));
        config.validate().unwrap();
    }

    #[test]
    fn test_json_round_robin_config() {
        let json = r#"{
            "bucket": "cnpm-test",
            "schedule": "roundRobin",
            "timeoutMs": 5000,
            "cacheControl": null,
            "nodes": [{"endpoint": "http://a"}, {"endpoint": "http://b"}]
        }"#;
        let config = ClientConfig::from_json_str(json).unwrap();
        assert_eq!(config.effective_schedule(), SchedulePolicy::RoundRobin);
        assert_eq!(config.mode, BucketMode::Private);
        assert!(config.cache_control.is_none());
        assert_eq!(config.timeout_ms, 5000);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ClientConfig::single("bucket", NodeConfig::new("http://a"));
        config.validate().unwrap();

        config.nodes.clear();
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let config = ClientConfig::single("", NodeConfig::new("http://a"));
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let mut config = ClientConfig::single("bucket", NodeConfig::new("http://a"));
        config.nodes.push(NodeConfig::new("http://b"));
        assert_matches!(config.validate(), Err(Error::Configuration(msg)) if msg.contains("schedule"));

        let config = ClientConfig::single("bucket", NodeConfig::new("  "));
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_public_host() {
        let config = ClientConfig::single("cnpm", NodeConfig::new("http://a"));
        assert_eq!(config.public_host(), "cnpm.oss-cn-hangzhou.aliyuncs.com");
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let node = NodeConfig::new("http://a").credentials("ak", "very-secret");
        let debug = format!("{:?}", node);
        assert!(debug.contains("ak"));
        assert!(!debug.contains("very-secret"));
    }
}
