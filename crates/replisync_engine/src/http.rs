//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine. The
//! actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, etc.) or an in-process loopback.
//!
//! Endpoints, relative to the base URL:
//! - `GET /sets/{id}` returns the snapshot JSON, or 404 if the set is unknown
//! - `PUT /sets/{id}` stores the snapshot JSON sent as body

use crate::error::{TransportError, TransportResult};
use crate::transport::TransportGateway;
use async_trait::async_trait;
use replisync_protocol::{Element, Snapshot};
use std::fmt;

/// HTTP method used by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `PUT`
    Put,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Put => f.write_str("PUT"),
        }
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with the given status and body.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Creates a `200 OK` response.
    pub fn ok(body: Vec<u8>) -> Self {
        Self::new(200, body)
    }

    /// Creates an empty `204 No Content` response.
    pub fn no_content() -> Self {
        Self::new(204, Vec::new())
    }

    /// Creates a `404 Not Found` response.
    pub fn not_found() -> Self {
        Self::new(404, b"not found".to_vec())
    }

    /// Creates an error response with a text body.
    pub fn error(status: u16, message: impl fmt::Display) -> Self {
        Self::new(status, message.to_string().into_bytes())
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. An `Err`
/// means the request never produced a response (DNS, connect, reset) and is
/// treated as retryable.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, String>;
}

/// HTTP-based sync transport.
///
/// Uses the JSON snapshot form for request and response bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://sync.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the URL of a set resource.
    pub fn set_url(&self, set_id: &str) -> String {
        format!("{}/sets/{}", self.base_url, encode_path_segment(set_id))
    }

    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> TransportResult<HttpResponse> {
        tracing::trace!(%method, url, "sending request");
        self.client
            .send(method, url, body)
            .await
            .map_err(TransportError::retryable)
    }
}

#[async_trait]
impl<T, C> TransportGateway<T> for HttpTransport<C>
where
    T: Element,
    C: HttpClient,
{
    async fn fetch(&self, set_id: &str) -> TransportResult<Option<Snapshot<T>>> {
        let response = self.send(HttpMethod::Get, &self.set_url(set_id), None).await?;
        match response.status {
            404 => Ok(None),
            _ if response.is_success() => Snapshot::from_json_slice(&response.body)
                .map(Some)
                .map_err(|e| TransportError::fatal(format!("failed to decode response: {}", e))),
            status => Err(TransportError::from_status(status, response.body_text())),
        }
    }

    async fn push(&self, set_id: &str, snapshot: &Snapshot<T>) -> TransportResult<()> {
        let body = snapshot
            .to_json_vec()
            .map_err(|e| TransportError::fatal(format!("failed to encode request: {}", e)))?;
        let response = self
            .send(HttpMethod::Put, &self.set_url(set_id), Some(body))
            .await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(TransportError::from_status(
                response.status,
                response.body_text(),
            ))
        }
    }
}

/// Trait for servers that can handle loopback requests.
#[async_trait]
pub trait LoopbackServer: Send + Sync {
    /// Handles a request for `path` (e.g. `/sets/todos`) and returns the
    /// response.
    async fn handle(&self, method: HttpMethod, path: &str, body: &[u8]) -> HttpResponse;
}

#[async_trait]
impl<S: LoopbackServer + ?Sized> LoopbackServer for std::sync::Arc<S> {
    async fn handle(&self, method: HttpMethod, path: &str, body: &[u8]) -> HttpResponse {
        (**self).handle(method, path, body).await
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead. The server sees the
/// URL path relative to the base URL, or the whole URL path when no base
/// URL was given.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    base_url: Option<String>,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            base_url: None,
        }
    }

    /// Sets the base URL that is stripped from every request URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn path<'u>(&self, url: &'u str) -> &'u str {
        if let Some(path) = self.base_url.as_deref().and_then(|base| url.strip_prefix(base)) {
            return path;
        }
        match url.split_once("://") {
            Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
            None => url,
        }
    }

    /// Returns the server behind this client.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, String> {
        let path = self.path(url);
        let body = body.unwrap_or_default();
        Ok(self.server.handle(method, path, &body).await)
    }
}

/// Percent-encodes a set id for use as a URL path segment.
///
/// Unreserved characters (`A-Z a-z 0-9 - . _ ~`) are kept.
pub fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Decodes a percent-encoded URL path segment.
///
/// Returns `None` for malformed escapes or non-UTF-8 results.
pub fn decode_path_segment(segment: &str) -> Option<String> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = segment.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
