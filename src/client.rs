//! OSS Client Facade
//!
//! Public entry point. Every operation asks the [`Scheduler`] for an attempt
//! plan, runs the backend call against the first node under the per-operation
//! timeout, and fails over along the plan when the error is retryable.

use crate::backends::{BackendFactory, SignerFactory};
use crate::cluster::{probe_once, HealthMonitor, Node, NodeRegistry, NodeStats, Scheduler};
use crate::config::ClientConfig;
use crate::domain::ports::{
    ObjectBackendRef, ObjectMeta, ObjectStream, OperationKind, UploadOptions, UploadResult,
};
use crate::error::{Error, Result};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Object storage client over one or more nodes
pub struct OssClient {
    config: Arc<ClientConfig>,
    scheduler: Arc<Scheduler>,
    backends: Vec<ObjectBackendRef>,
    timeout: Duration,
}

impl std::fmt::Debug for OssClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OssClient")
            .field("bucket", &self.config.bucket)
            .field("policy", &self.scheduler.policy())
            .field("nodes", &self.backends.len())
            .finish()
    }
}

/// Create a client talking HTTP to every configured node
pub fn create(config: ClientConfig) -> Result<OssClient> {
    OssClient::new(config)
}

impl OssClient {
    /// Create a client talking HTTP to every configured node
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let registry = NodeRegistry::from_config(&config)?;
        let backends = BackendFactory::http_all(&config, &registry)?;
        Self::assemble(config, registry, backends)
    }

    /// Create a client talking HTTP to every node, signing requests with
    /// the signer `signers` builds for each node
    pub fn with_signer_factory(config: ClientConfig, signers: &SignerFactory) -> Result<Self> {
        config.validate()?;
        let registry = NodeRegistry::from_config(&config)?;
        let backends = BackendFactory::http_all_signed(&config, &registry, signers)?;
        Self::assemble(config, registry, backends)
    }

    /// Create a client with caller-supplied backends, one per node in config order
    pub fn with_backends(config: ClientConfig, backends: Vec<ObjectBackendRef>) -> Result<Self> {
        config.validate()?;
        let registry = NodeRegistry::from_config(&config)?;
        if backends.len() != registry.len() {
            return Err(Error::Configuration(format!(
                "{} backends supplied for {} nodes",
                backends.len(),
                registry.len()
            )));
        }
        Self::assemble(config, registry, backends)
    }

    fn assemble(
        config: ClientConfig,
        registry: NodeRegistry,
        backends: Vec<ObjectBackendRef>,
    ) -> Result<Self> {
        let policy = config.effective_schedule();
        let scheduler = Scheduler::new(policy, Arc::new(registry))
            .with_unreachable_ttl(Duration::from_secs(config.unreachable_ttl_secs));

        info!(
            bucket = %config.bucket,
            mode = ?config.mode,
            policy = %policy,
            nodes = backends.len(),
            "OSS client created"
        );

        Ok(Self {
            timeout: config.operation_timeout(),
            config: Arc::new(config),
            scheduler: Arc::new(scheduler),
            backends,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Health snapshot of every node
    pub fn node_stats(&self) -> Vec<NodeStats> {
        self.scheduler.stats()
    }

    /// Probe every node once, returning how many answered
    pub async fn probe_nodes(&self) -> usize {
        probe_once(
            &self.scheduler,
            &self.backends,
            &self.config.health_check.probe_key,
            self.timeout,
        )
        .await
    }

    /// Start probing nodes in the background using the configured interval
    pub fn start_health_monitor(&self) -> HealthMonitor {
        let health = &self.config.health_check;
        HealthMonitor::spawn(
            self.scheduler.clone(),
            self.backends.clone(),
            health.probe_key.clone(),
            Duration::from_secs(health.interval_secs.max(1)),
            self.timeout,
        )
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Upload a local file
    pub async fn upload(&self, path: impl AsRef<Path>, options: UploadOptions) -> Result<UploadResult> {
        let data = tokio::fs::read(path.as_ref()).await?;
        self.upload_buffer(Bytes::from(data), options).await
    }

    /// Upload a byte stream
    ///
    /// The stream is drained before any node is contacted, so a retry on
    /// another node resends the same bytes.
    pub async fn upload_stream<S, E>(&self, stream: S, options: UploadOptions) -> Result<UploadResult>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<Error>,
    {
        let chunks: Vec<Bytes> = stream.map_err(Into::<Error>::into).try_collect().await?;
        self.upload_buffer(Bytes::from(chunks.concat()), options).await
    }

    /// Upload an in-memory buffer
    pub async fn upload_buffer(&self, data: Bytes, options: UploadOptions) -> Result<UploadResult> {
        let object = object_name(&options.key)?;
        let mut headers = options.headers;
        if headers.cache_control.is_none() {
            headers.cache_control = self.config.cache_control.clone();
        }

        let size = data.len();
        self.execute(OperationKind::Upload, &options.key, |_, backend| {
            let object = object.clone();
            let data = data.clone();
            let headers = headers.clone();
            async move { backend.put_object(&object, data, &headers).await }
        })
        .await?;

        debug!(key = %options.key, size, "Uploaded object");

        let url = self.config.mode.is_public().then(|| self.url(&options.key));
        Ok(UploadResult {
            key: options.key,
            url,
        })
    }

    /// Download an object to a local file
    ///
    /// Bytes go to a hidden temporary file beside `destination` that is
    /// renamed into place once complete. The temporary file is removed on
    /// error and when the returned future is dropped early.
    pub async fn download(&self, key: &str, destination: impl AsRef<Path>) -> Result<()> {
        let destination = destination.as_ref();
        let mut stream = self.open_stream(OperationKind::Download, key).await?;
        let (file, partial) = partial_file(destination)?;
        let mut file = tokio::fs::File::from_std(file);

        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        partial.persist(destination).map_err(|e| Error::Io(e.error))?;
        debug!(key, path = %destination.display(), bytes = written, "Downloaded object");
        Ok(())
    }

    /// Open an object as a lazily produced byte stream
    ///
    /// Failover applies to opening the stream; once bytes flow, errors are
    /// surfaced through the stream. Each chunk must arrive within the
    /// operation timeout, otherwise the stream ends with a `Timeout` error.
    pub async fn create_download_stream(&self, key: &str) -> Result<ObjectStream> {
        self.open_stream(OperationKind::Stream, key).await
    }

    /// Read a whole object into memory
    pub async fn read_bytes(&self, key: &str) -> Result<Bytes> {
        let object = object_name(key)?;
        self.execute(OperationKind::Read, key, |_, backend| {
            let object = object.clone();
            async move {
                let chunks: Vec<Bytes> = backend.get_object(&object).await?.try_collect().await?;
                Ok(Bytes::from(chunks.concat()))
            }
        })
        .await
    }

    /// Fetch object metadata
    pub async fn stat(&self, key: &str) -> Result<ObjectMeta> {
        let object = object_name(key)?;
        self.execute(OperationKind::Stat, key, |_, backend| {
            let object = object.clone();
            async move { backend.head_object(&object).await }
        })
        .await
    }

    /// Public URL of an object
    ///
    /// Pure function of bucket, region and key; performs no I/O.
    pub fn url(&self, key: &str) -> String {
        if key.starts_with('/') {
            format!("http://{}{}", self.config.public_host(), key)
        } else {
            format!("http://{}/{}", self.config.public_host(), key)
        }
    }

    /// Remove an object; removing an absent key succeeds
    pub async fn remove(&self, key: &str) -> Result<()> {
        let object = object_name(key)?;
        let result = self
            .execute(OperationKind::Remove, key, |_, backend| {
                let object = object.clone();
                async move { backend.delete_object(&object).await }
            })
            .await;

        match result {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    // =========================================================================
    // Execution
    // =========================================================================

    async fn open_stream(&self, kind: OperationKind, key: &str) -> Result<ObjectStream> {
        let object = object_name(key)?;
        let idle = self.timeout;
        self.execute(kind, key, |node, backend| {
            let object = object.clone();
            let scheduler = self.scheduler.clone();
            async move {
                let body = backend.get_object(&object).await?;
                Ok(idle_timeout(body, scheduler, node, kind, idle))
            }
        })
        .await
    }

    async fn execute<T, F, Fut>(&self, kind: OperationKind, key: &str, op: F) -> Result<T>
    where
        F: Fn(Arc<Node>, ObjectBackendRef) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let plan = self.scheduler.plan(kind)?;
        let attempts = plan.len();

        for (attempt, node) in plan.iter().enumerate() {
            let backend = self.backend_for(node)?;

            let outcome = match tokio::time::timeout(self.timeout, op(node.clone(), backend)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    node: node.id().to_string(),
                    operation: kind.to_string(),
                    elapsed: self.timeout,
                }),
            };

            match outcome {
                Ok(value) => {
                    self.scheduler.report_success(node);
                    return Ok(value);
                }
                Err(Error::NoSuchKey { node: at, .. }) => {
                    // The node answered; absence is not a node failure
                    self.scheduler.report_success(node);
                    return Err(Error::no_such_key(key, at));
                }
                Err(e) => {
                    self.scheduler.report_failure(node, &e);
                    if e.is_retryable() && attempt + 1 < attempts {
                        warn!(
                            operation = %kind,
                            key,
                            node = %node.id(),
                            next = %plan[attempt + 1].id(),
                            error = %e,
                            "Operation failed, retrying on next node"
                        );
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(Error::Internal("empty scheduling plan".into()))
    }

    fn backend_for(&self, node: &Node) -> Result<ObjectBackendRef> {
        self.backends
            .get(node.index())
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no backend for node {}", node.id())))
    }
}

/// Ends `body` with a `Timeout` error when no chunk arrives within `idle`
fn idle_timeout(
    body: ObjectStream,
    scheduler: Arc<Scheduler>,
    node: Arc<Node>,
    kind: OperationKind,
    idle: Duration,
) -> ObjectStream {
    Box::pin(stream::unfold(Some(body), move |state| {
        let scheduler = scheduler.clone();
        let node = node.clone();
        async move {
            let mut body = state?;
            match tokio::time::timeout(idle, body.next()).await {
                Ok(Some(chunk)) => Some((chunk, Some(body))),
                Ok(None) => None,
                Err(_) => {
                    let err = Error::Timeout {
                        node: node.id().to_string(),
                        operation: kind.to_string(),
                        elapsed: idle,
                    };
                    scheduler.report_failure(&node, &err);
                    Some((Err(err), None))
                }
            }
        }
    }))
}

/// Hidden `.name.XXXXXX.download` beside `destination`, deleted when dropped
fn partial_file(destination: &Path) -> Result<(std::fs::File, TempPath)> {
    let name = destination.file_name().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("download destination has no file name: {}", destination.display()),
        ))
    })?;
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut prefix = std::ffi::OsString::from(".");
    prefix.push(name);
    prefix.push(".");

    let temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".download")
        .tempfile_in(dir)?;
    Ok(temp.into_parts())
}

/// Backend object name for a key: the key without its leading `/`
fn object_name(key: &str) -> Result<String> {
    let object = key.trim_start_matches('/');
    if object.is_empty() {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(object.to_string())
}
