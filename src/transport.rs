//! HTTP transport abstraction.
//!
//! The executor talks to the service through [`Transport`], which sends one
//! fully-built request and yields the response head plus an incrementally
//! readable body.  [`ReqwestTransport`] is the production implementation;
//! tests plug in scripted or in-memory transports.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Url;
use std::future::Future;
use std::pin::Pin;

use crate::errors::{Result, StorageError};

/// A concrete HTTP request for one attempt.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    /// Empty-bodied request.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Set a header, rejecting names or values that are not valid HTTP.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| StorageError::invalid_argument(format!("header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| StorageError::invalid_argument(format!("header value for {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// A header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    /// A header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `Content-Length`, if advertised.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }
}

/// Incrementally readable response body.
pub trait ResponseBody: Send {
    /// Next chunk of the body, or `None` once the body is exhausted.
    fn chunk(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>>> + Send + '_>>;
}

/// A body that is already fully in memory.
pub struct FullBody {
    data: Option<Bytes>,
}

impl FullBody {
    pub fn new(data: Bytes) -> Self {
        Self {
            data: if data.is_empty() { None } else { Some(data) },
        }
    }
}

impl ResponseBody for FullBody {
    fn chunk(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>>> + Send + '_>> {
        let next = self.data.take();
        Box::pin(async move { Ok(next) })
    }
}

/// Response head plus body.
pub struct HttpResponse {
    pub head: ResponseHead,
    pub body: Box<dyn ResponseBody>,
}

impl HttpResponse {
    /// Response with an in-memory body.
    pub fn full(head: ResponseHead, body: Bytes) -> Self {
        Self {
            head,
            body: Box::new(FullBody::new(body)),
        }
    }

    /// Read the body to the end, keeping at most `limit` bytes.  Remaining
    /// bytes are still drained so the connection can be reused.
    pub async fn read_limited(&mut self, limit: usize) -> Result<Bytes> {
        let mut out = bytes::BytesMut::new();
        while let Some(chunk) = self.body.chunk().await? {
            let room = limit.saturating_sub(out.len());
            out.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
        Ok(out.freeze())
    }
}

/// Sends one HTTP request.
pub trait Transport: Send + Sync + 'static {
    /// Send `request` and resolve once the response head has arrived.  The
    /// body is read afterwards through [`HttpResponse::body`].
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + '_>>;
}

// -- reqwest -----------------------------------------------------------------

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a pre-configured client (proxies, TLS roots, pool limits).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

struct ReqwestBody {
    response: reqwest::Response,
}

impl ResponseBody for ReqwestBody {
    fn chunk(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>>> + Send + '_>> {
        Box::pin(async move { self.response.chunk().await.map_err(StorageError::transport) })
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + '_>> {
        Box::pin(async move {
            let response = self
                .client
                .request(request.method, request.url)
                .headers(request.headers)
                .body(request.body)
                .send()
                .await
                .map_err(StorageError::transport)?;

            let head = ResponseHead {
                status: response.status(),
                headers: response.headers().clone(),
            };
            Ok(HttpResponse {
                head,
                body: Box::new(ReqwestBody { response }),
            })
        })
    }
}

// -- Tests -------------------------------------------------------------------
