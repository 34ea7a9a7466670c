//! HTTP Object Backend
//!
//! Talks to an OSS-style REST endpoint with reqwest:
//! `PUT/GET/HEAD/DELETE {scheme}://{bucket}.{host}/{object}` (virtual-hosted)
//! or `{endpoint}/{bucket}/{object}` (path-style).
//!
//! Status mapping:
//! - 404 → `NoSuchKey` (DELETE treats it as success)
//! - 502/503/504 → `Connectivity` (node temporarily unable to serve)
//! - other non-2xx → `Backend`
//! - transport failures → `Connectivity`, reqwest timeouts → `Timeout`

use crate::cluster::Node;
use crate::domain::ports::{ObjectBackend, ObjectHeaders, ObjectMeta, ObjectStream};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE,
};
use reqwest::{Client, Method, Request, StatusCode, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// =============================================================================
// Request Signing
// =============================================================================

/// Hook for authenticating outgoing requests
///
/// Provider signature algorithms live outside this crate; a signer receives
/// the fully built request and may add headers or query parameters.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &mut Request) -> Result<()>;
}

/// Sends requests unauthenticated
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousSigner;

impl RequestSigner for AnonymousSigner {
    fn sign(&self, _request: &mut Request) -> Result<()> {
        Ok(())
    }
}

/// Builds the signer for one node, usually from `Node::credentials`
pub type SignerFactory = dyn Fn(&Node) -> Result<Arc<dyn RequestSigner>> + Send + Sync;

// =============================================================================
// HTTP Backend
// =============================================================================

/// Node backend speaking the OSS REST protocol
pub struct HttpBackend {
    node: String,
    base: Url,
    bucket: String,
    path_style: bool,
    client: Client,
    signer: Arc<dyn RequestSigner>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("node", &self.node)
            .field("base", &self.base.as_str())
            .field("bucket", &self.bucket)
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl HttpBackend {
    /// Create a backend for a registry node
    pub fn for_node(node: &Node, bucket: &str, client: Client) -> Result<Self> {
        Self::new(node.id().as_str(), node.endpoint(), bucket, node.path_style(), client)
    }

    pub fn new(
        node: impl Into<String>,
        endpoint: &str,
        bucket: &str,
        path_style: bool,
        client: Client,
    ) -> Result<Self> {
        let node = node.into();
        let endpoint = endpoint.trim();
        let with_scheme = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        };
        let base = Url::parse(&with_scheme).map_err(|e| {
            Error::Configuration(format!("invalid endpoint for node {}: {}", node, e))
        })?;
        if base.host_str().is_none() {
            return Err(Error::Configuration(format!(
                "endpoint for node {} has no host: {}",
                node, endpoint
            )));
        }

        Ok(Self {
            node,
            base,
            bucket: bucket.to_string(),
            path_style,
            client,
            signer: Arc::new(AnonymousSigner),
        })
    }

    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Shared reqwest client for all nodes of one client
    pub fn build_client(connect_timeout: Duration) -> Result<Client> {
        Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))
    }

    /// Full URL of an object on this node
    pub fn object_url(&self, object: &str) -> String {
        let encoded = object
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let scheme = self.base.scheme();
        let host = self.base.host_str().unwrap_or_default();
        let port = self.base.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let base_path = self.base.path().trim_end_matches('/');

        if self.path_style {
            format!("{}://{}{}{}/{}/{}", scheme, host, port, base_path, self.bucket, encoded)
        } else {
            format!("{}://{}.{}{}{}/{}", scheme, self.bucket, host, port, base_path, encoded)
        }
    }

    async fn send(
        &self,
        method: Method,
        object: &str,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response> {
        let url = self.object_url(object);
        let mut builder = self.client.request(method.clone(), &url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let mut request = builder
            .build()
            .map_err(|e| Error::Internal(format!("failed to build request for {}: {}", url, e)))?;
        self.signer.sign(&mut request)?;

        let started = Instant::now();
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| self.transport_error(&method, e, started.elapsed()))?;

        debug!(
            node = %self.node,
            method = %method,
            url = %url,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "OSS request"
        );
        Ok(response)
    }

    fn transport_error(&self, method: &Method, e: reqwest::Error, elapsed: Duration) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                node: self.node.clone(),
                operation: method.to_string(),
                elapsed,
            }
        } else {
            Error::connectivity(&self.node, e)
        }
    }

    async fn status_error(&self, object: &str, response: reqwest::Response) -> Error {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Error::no_such_key(object, &self.node);
        }
        let body = response.text().await.unwrap_or_default();
        let reason = extract_error_code(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

        match status {
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                Error::connectivity(&self.node, format!("HTTP {}: {}", status.as_u16(), reason))
            }
            _ => Error::Backend {
                node: self.node.clone(),
                status: status.as_u16(),
                reason,
            },
        }
    }
}

/// Pull `<Code>...</Code>` out of an OSS XML error body
fn extract_error_code(body: &str) -> Option<String> {
    let start = body.find("<Code>")? + "<Code>".len();
    let end = body[start..].find("</Code>")? + start;
    let code = body[start..end].trim();
    (!code.is_empty()).then(|| code.to_string())
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn to_header_map(headers: &ObjectHeaders) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    let content_type = headers.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
    map.insert(CONTENT_TYPE, header_value(content_type)?);
    if let Some(cache_control) = &headers.cache_control {
        map.insert(CACHE_CONTROL, header_value(cache_control)?);
    }
    for (name, value) in &headers.extra {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Configuration(format!("invalid header name {}: {}", name, e)))?;
        map.insert(name, header_value(value)?);
    }
    Ok(map)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Configuration(format!("invalid header value {:?}: {}", value, e)))
}

#[async_trait]
impl ObjectBackend for HttpBackend {
    async fn put_object(&self, object: &str, body: Bytes, headers: &ObjectHeaders) -> Result<()> {
        let response = self
            .send(Method::PUT, object, to_header_map(headers)?, Some(body))
            .await?;
        if !response.status().is_success() {
            return Err(self.status_error(object, response).await);
        }
        Ok(())
    }

    async fn get_object(&self, object: &str) -> Result<ObjectStream> {
        let response = self.send(Method::GET, object, HeaderMap::new(), None).await?;
        if !response.status().is_success() {
            return Err(self.status_error(object, response).await);
        }

        let node = self.node.clone();
        let stream = response
            .bytes_stream()
            .map_err(move |e| Error::connectivity(&node, format!("body read failed: {}", e)));
        Ok(Box::pin(stream))
    }

    async fn head_object(&self, object: &str) -> Result<ObjectMeta> {
        let response = self.send(Method::HEAD, object, HeaderMap::new(), None).await?;
        if !response.status().is_success() {
            return Err(self.status_error(object, response).await);
        }

        let headers = response.headers();
        Ok(ObjectMeta {
            // HEAD has no body, so content_length() would report 0
            size: header_string(headers, CONTENT_LENGTH)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            content_type: header_string(headers, CONTENT_TYPE),
            cache_control: header_string(headers, CACHE_CONTROL),
            etag: header_string(headers, reqwest::header::ETAG),
            last_modified: header_string(headers, reqwest::header::LAST_MODIFIED)
                .and_then(|s| chrono::DateTime::parse_from_rfc2822(&s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
        })
    }

    async fn delete_object(&self, object: &str) -> Result<()> {
        let response = self.send(Method::DELETE, object, HeaderMap::new(), None).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(self.status_error(object, response).await)
    }

    fn backend_name(&self) -> &str {
        "http"
    }
}
