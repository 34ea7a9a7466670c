//! Node Backend Adapters
//!
//! Provides adapters for the storage nodes a client talks to:
//! - HTTP: OSS REST endpoints
//! - Memory: in-process store with fault injection

pub mod http;
pub mod memory;

pub use http::*;
pub use memory::*;

use crate::cluster::{Node, NodeRegistry};
use crate::config::ClientConfig;
use crate::domain::ports::ObjectBackendRef;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Factory for creating node backends
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend by name for one node of the registry
    pub fn create(
        name: &str,
        config: &ClientConfig,
        registry: &NodeRegistry,
        index: usize,
    ) -> Result<ObjectBackendRef> {
        let node = registry.get(index).ok_or_else(|| {
            Error::Configuration(format!("no node at index {}", index))
        })?;

        match name.to_lowercase().as_str() {
            "http" | "oss" => {
                warn_unsigned(node);
                let client = HttpBackend::build_client(connect_timeout(config))?;
                Ok(Arc::new(HttpBackend::for_node(node, &config.bucket, client)?))
            }
            "memory" | "mem" => Ok(Arc::new(MemoryBackend::new(node.id().as_str()))),
            _ => Err(Error::Configuration(format!("unknown backend: {}", name))),
        }
    }

    /// HTTP backends for every node, sharing one connection pool
    ///
    /// Requests go out unsigned. Use [`BackendFactory::http_all_signed`] when
    /// nodes carry credentials.
    pub fn http_all(config: &ClientConfig, registry: &NodeRegistry) -> Result<Vec<ObjectBackendRef>> {
        let client = HttpBackend::build_client(connect_timeout(config))?;
        registry
            .nodes()
            .iter()
            .map(|node| {
                warn_unsigned(node);
                HttpBackend::for_node(node, &config.bucket, client.clone())
                    .map(|b| Arc::new(b) as ObjectBackendRef)
            })
            .collect()
    }

    /// HTTP backends for every node, each signed by the signer built for it
    pub fn http_all_signed(
        config: &ClientConfig,
        registry: &NodeRegistry,
        signers: &SignerFactory,
    ) -> Result<Vec<ObjectBackendRef>> {
        let client = HttpBackend::build_client(connect_timeout(config))?;
        registry
            .nodes()
            .iter()
            .map(|node| {
                let signer = signers(node)?;
                let backend = HttpBackend::for_node(node, &config.bucket, client.clone())?;
                Ok(Arc::new(backend.with_signer(signer)) as ObjectBackendRef)
            })
            .collect()
    }

    /// Memory backends for every node, all sharing one store
    pub fn memory_shared(registry: &NodeRegistry) -> (Arc<ObjectStore>, Vec<Arc<MemoryBackend>>) {
        let store = Arc::new(ObjectStore::new());
        let backends = registry
            .nodes()
            .iter()
            .map(|node| Arc::new(MemoryBackend::with_store(node.id().as_str(), store.clone())))
            .collect();
        (store, backends)
    }
}

fn warn_unsigned(node: &Node) {
    if let Some(credentials) = node.credentials() {
        warn!(
            node = %node.id(),
            access_key_id = %credentials.access_key_id,
            "Node has credentials but no signer, requests will be anonymous"
        );
    }
}

fn connect_timeout(config: &ClientConfig) -> Duration {
    config.operation_timeout().min(Duration::from_secs(10))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SchedulePolicy;
    use crate::config::NodeConfig;

    fn config() -> ClientConfig {
        ClientConfig::cluster(
            "cnpm",
            SchedulePolicy::RoundRobin,
            vec![NodeConfig::new("http://a.example"), NodeConfig::new("http://b.example")],
        )
    }

    #[test]
    fn test_factory_by_name() {
        let config = config();
        let registry = NodeRegistry::from_config(&config).unwrap();

        assert_eq!(BackendFactory::create("http", &config, &registry, 0).unwrap().backend_name(), "http");
        assert_eq!(BackendFactory::create("memory", &config, &registry, 1).unwrap().backend_name(), "memory");
        assert!(BackendFactory::create("ftp", &config, &registry, 0).is_err());
        assert!(BackendFactory::create("http", &config, &registry, 5).is_err());
    }

    #[test]
    fn test_http_all_signed_passes_node_credentials() {
        let mut config = config();
        config.nodes[0] = NodeConfig::new("http://a.example").credentials("ak-a", "secret-a");
        let registry = NodeRegistry::from_config(&config).unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let signers = move |node: &Node| -> Result<Arc<dyn RequestSigner>> {
            seen_in.lock().push((
                node.id().to_string(),
                node.credentials().map(|c| c.access_key_id.clone()),
            ));
            Ok(Arc::new(AnonymousSigner))
        };
        let backends = BackendFactory::http_all_signed(&config, &registry, &signers).unwrap();
        assert_eq!(backends.len(), 2);
        assert_eq!(
            *seen.lock(),
            vec![
                ("node-0".to_string(), Some("ak-a".to_string())),
                ("node-1".to_string(), None),
            ]
        );

        let failing = |node: &Node| -> Result<Arc<dyn RequestSigner>> {
            Err(Error::Configuration(format!("no key for {}", node.id())))
        };
        assert!(matches!(
            BackendFactory::http_all_signed(&config, &registry, &failing),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_http_all_and_memory_shared() {
        let config = config();
        let registry = NodeRegistry::from_config(&config).unwrap();

        assert_eq!(BackendFactory::http_all(&config, &registry).unwrap().len(), 2);

        let (store, backends) = BackendFactory::memory_shared(&registry);
        assert_eq!(backends.len(), 2);
        assert!(Arc::ptr_eq(&store, backends[1].store()));
        assert_eq!(backends[0].node(), "node-0");
    }
}
