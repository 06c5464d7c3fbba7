//! HTTP requester abstraction.
//!
//! The query client only needs one operation: submit a request, get a
//! response or a [`TransportError`] back. Everything else about the HTTP
//! stack stays behind this trait, so tests swap in mocks per client
//! instead of mutating process-wide state.

use async_trait::async_trait;
use thiserror::Error;

/// An outgoing request to one metric server.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

/// A server response; the body is handed back raw.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failure classes. Everything here maps onto a
/// per-server request status; anything else propagates to the caller
/// unchanged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection closed before a response arrived")]
    ConnectionClosed,

    #[error("Response body could not be read")]
    InvalidBody,

    #[error("Transport failure: {0}")]
    Other(String),
}

/// Submits requests to metric servers. Swappable per client for tests.
#[async_trait]
pub trait Requester: Send + Sync + std::fmt::Debug {
    async fn submit(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Default requester backed by a pooled [`reqwest::Client`].
#[derive(Debug, Default)]
pub struct ReqwestRequester {
    client: reqwest::Client,
}

impl ReqwestRequester {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Requester for ReqwestRequester {
    async fn submit(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.get(&request.uri).body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|_| TransportError::InvalidBody)?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::ConnectionClosed
    } else if e.is_body() || e.is_decode() {
        TransportError::InvalidBody
    } else {
        TransportError::Other(e.to_string())
    }
}
