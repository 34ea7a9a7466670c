//! In-Memory Object Backend
//!
//! Node backend keeping objects in a DashMap. Several backends can share one
//! [`ObjectStore`], which models cluster nodes that converge on the same
//! backing store. Supports fault injection (offline mode, added latency) so
//! failover paths can be exercised without a network.

use crate::domain::ports::{ObjectBackend, ObjectHeaders, ObjectMeta, ObjectStream};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Size of chunks produced by [`MemoryBackend::get_object`]
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// Object Store
// =============================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    headers: ObjectHeaders,
    etag: String,
    last_modified: DateTime<Utc>,
}

/// Shared object map
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: DashMap<String, StoredObject>,
    size_bytes: AtomicU64,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, object: &str) -> bool {
        self.objects.contains_key(object)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Total stored bytes
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    fn insert(&self, object: &str, data: Bytes, headers: ObjectHeaders) {
        let new_size = data.len() as u64;
        let stored = StoredObject {
            etag: format!("\"{:016x}-{}\"", checksum(&data), data.len()),
            data,
            headers,
            last_modified: Utc::now(),
        };
        match self.objects.insert(object.to_string(), stored) {
            Some(old) => {
                self.size_bytes.fetch_sub(old.data.len() as u64, Ordering::Relaxed);
                self.size_bytes.fetch_add(new_size, Ordering::Relaxed);
            }
            None => {
                self.size_bytes.fetch_add(new_size, Ordering::Relaxed);
            }
        }
    }

    fn get(&self, object: &str) -> Option<StoredObject> {
        self.objects.get(object).map(|r| r.value().clone())
    }

    fn remove(&self, object: &str) -> bool {
        match self.objects.remove(object) {
            Some((_, old)) => {
                self.size_bytes.fetch_sub(old.data.len() as u64, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

/// FNV-1a, good enough for a stable ETag
fn checksum(data: &[u8]) -> u64 {
    data.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

// =============================================================================
// Memory Backend
// =============================================================================

/// In-process node backend
#[derive(Debug)]
pub struct MemoryBackend {
    node: String,
    store: Arc<ObjectStore>,
    offline: AtomicBool,
    stall_body: AtomicBool,
    latency_ms: AtomicU64,
    puts: AtomicU64,
    gets: AtomicU64,
    heads: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryBackend {
    /// Backend with a private store
    pub fn new(node: impl Into<String>) -> Self {
        Self::with_store(node, Arc::new(ObjectStore::new()))
    }

    /// Backend sharing an existing store
    pub fn with_store(node: impl Into<String>, store: Arc<ObjectStore>) -> Self {
        Self {
            node: node.into(),
            store,
            offline: AtomicBool::new(false),
            stall_body: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            heads: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Make every request fail with a connectivity error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Make object bodies stop after their first chunk without ending
    pub fn set_stall_body(&self, stall: bool) {
        self.stall_body.store(stall, Ordering::Release);
    }

    /// Delay every request
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Release);
    }

    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn head_count(&self) -> u64 {
        self.heads.load(Ordering::Relaxed)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Total requests that reached this node, including failed ones
    pub fn request_count(&self) -> u64 {
        self.put_count() + self.get_count() + self.head_count() + self.delete_count()
    }

    async fn admit(&self, counter: &AtomicU64) -> Result<()> {
        counter.fetch_add(1, Ordering::Relaxed);
        let latency = self.latency_ms.load(Ordering::Acquire);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::Acquire) {
            return Err(Error::connectivity(&self.node, "node offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn put_object(&self, object: &str, body: Bytes, headers: &ObjectHeaders) -> Result<()> {
        self.admit(&self.puts).await?;
        self.store.insert(object, body, headers.clone());
        Ok(())
    }

    async fn get_object(&self, object: &str) -> Result<ObjectStream> {
        self.admit(&self.gets).await?;
        let stored = self
            .store
            .get(object)
            .ok_or_else(|| Error::no_such_key(object, &self.node))?;

        let data = stored.data;
        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(STREAM_CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + STREAM_CHUNK_SIZE).min(data.len()))))
            .collect();
        if self.stall_body.load(Ordering::Acquire) {
            let head = stream::iter(chunks.into_iter().take(1));
            return Ok(Box::pin(head.chain(stream::pending())));
        }
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn head_object(&self, object: &str) -> Result<ObjectMeta> {
        self.admit(&self.heads).await?;
        let stored = self
            .store
            .get(object)
            .ok_or_else(|| Error::no_such_key(object, &self.node))?;

        Ok(ObjectMeta {
            size: stored.data.len() as u64,
            content_type: stored.headers.content_type,
            cache_control: stored.headers.cache_control,
            etag: Some(stored.etag),
            last_modified: Some(stored.last_modified),
        })
    }

    async fn delete_object(&self, object: &str) -> Result<()> {
        self.admit(&self.deletes).await?;
        self.store.remove(object);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
