use bytes::Bytes;
use futures_core::future::BoxFuture;
use http::HeaderMap;

use crate::config::ResolvedRequest;

/// Flags forwarded verbatim to the transport. The pipeline merges them but
/// never interprets them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportFlags {
    pub ssl_verify: bool,
    pub with_credentials: bool,
    pub enable_http2: bool,
    pub enable_cookie: bool,
}

impl Default for TransportFlags {
    fn default() -> Self {
        Self {
            ssl_verify: true,
            with_credentials: false,
            enable_http2: false,
            enable_cookie: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Timeout,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Timeout => "timeout",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// The raw outcome of a technically-successful exchange, before any
/// classification. Status >= 400 still arrives through this type.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cookies: Vec<String>,
}

/// A transport-level failure: the exchange produced no status code at all.
#[derive(Clone, Debug)]
pub struct TransportFailure {
    pub kind: TransportErrorKind,
    pub message: String,
    pub code: Option<String>,
}

impl TransportFailure {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// The single capability this crate requires from its environment: move one
/// resolved request over the wire and report what came back.
///
/// A transport performs exactly one attempt per `send` call; retries,
/// caching, and de-duplication live above it. The request's `timeout` is the
/// deadline the transport is expected to enforce, reporting expiry as a
/// failure with [`TransportErrorKind::Timeout`].
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: ResolvedRequest,
    ) -> BoxFuture<'_, Result<RawResponse, TransportFailure>>;
}
