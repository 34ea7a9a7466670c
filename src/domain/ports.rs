//! Domain Ports - Core trait definitions for the OSS client
//!
//! These traits define the boundary between the scheduling/facade logic and
//! the storage nodes. Each configured node is served by one [`ObjectBackend`].

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

// =============================================================================
// Operation Kinds
// =============================================================================

/// Kind of operation submitted to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Upload,
    Download,
    Stream,
    Read,
    Stat,
    Remove,
}

impl OperationKind {
    /// Write-class operations mutate backend-held state
    pub fn is_write(&self) -> bool {
        matches!(self, OperationKind::Upload | OperationKind::Remove)
    }

    pub fn is_read(&self) -> bool {
        !self.is_write()
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Upload => write!(f, "upload"),
            OperationKind::Download => write!(f, "download"),
            OperationKind::Stream => write!(f, "stream"),
            OperationKind::Read => write!(f, "read"),
            OperationKind::Stat => write!(f, "stat"),
            OperationKind::Remove => write!(f, "remove"),
        }
    }
}

// =============================================================================
// Objects
// =============================================================================

/// Lazily produced, single-pass object body
///
/// Dropping the stream releases the underlying connection.
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Headers stored alongside an object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeaders {
    /// Content-Type header
    pub content_type: Option<String>,
    /// Cache-Control header
    pub cache_control: Option<String>,
    /// Any other headers, sent verbatim
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ObjectHeaders {
    pub fn with_content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn with_cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = Some(value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }
}

/// Object metadata as reported by a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object size in bytes
    pub size: u64,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

// =============================================================================
// Upload Request/Result
// =============================================================================

/// Options for an upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Object key, e.g. `/prefix/-/file.js`
    pub key: String,
    /// Headers stored with the object; unset fields fall back to client defaults
    #[serde(default)]
    pub headers: ObjectHeaders,
}

impl UploadOptions {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            headers: ObjectHeaders::default(),
        }
    }

    pub fn headers(mut self, headers: ObjectHeaders) -> Self {
        self.headers = headers;
        self
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// The key the object was stored under
    pub key: String,
    /// Public URL, present only when the bucket is public
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// =============================================================================
// Object Backend Port
// =============================================================================

/// Port for the object operations of a single storage node
///
/// Object names passed here never start with `/`.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Store an object, replacing any existing one
    async fn put_object(&self, object: &str, body: Bytes, headers: &ObjectHeaders) -> Result<()>;

    /// Open an object for streaming
    ///
    /// Fails with `NoSuchKey` before any bytes are produced if the object is absent.
    async fn get_object(&self, object: &str) -> Result<ObjectStream>;

    /// Fetch object metadata
    async fn head_object(&self, object: &str) -> Result<ObjectMeta>;

    /// Delete an object; deleting an absent object succeeds
    async fn delete_object(&self, object: &str) -> Result<()>;

    /// Get backend name
    fn backend_name(&self) -> &str;
}

pub type ObjectBackendRef = Arc<dyn ObjectBackend>;
