use http::StatusCode;
use thiserror::Error;

use crate::config::ResolvedRequest;
use crate::response::ResponseEnvelope;
use crate::transport::TransportErrorKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Http,
    Business,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Http => "http",
            Self::Business => "business",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// The settled failure of a request. Every variant carries the resolved
/// request that produced it; `Http` and `Business` also carry the envelope
/// that was classified as a failure.
///
/// `Error` is `Clone` so a de-duplicated in-flight outcome can be delivered
/// to every waiting caller.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport failed before any status code was obtained.
    #[error("network failure ({kind}) for {} {}: {message}", .request.method, .request.url)]
    Network {
        kind: TransportErrorKind,
        message: String,
        code: Option<String>,
        request: Box<ResolvedRequest>,
    },
    /// The transport signalled a deadline expiry.
    #[error("request timed out after {timeout_ms}ms for {} {}", .request.method, .request.url)]
    Timeout {
        timeout_ms: u64,
        message: String,
        request: Box<ResolvedRequest>,
    },
    /// The transport succeeded but the server answered with status >= 400.
    #[error("http status {status} for {} {}: {message}", .request.method, .request.url)]
    Http {
        status: u16,
        message: String,
        request: Box<ResolvedRequest>,
        response: Box<ResponseEnvelope>,
    },
    /// The server answered with a success status whose payload carries an
    /// embedded application status that signals failure.
    #[error("business failure {code} for {} {}: {message}", .request.method, .request.url)]
    Business {
        code: String,
        message: String,
        request: Box<ResolvedRequest>,
        response: Box<ResponseEnvelope>,
    },
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Http { .. } => ErrorKind::Http,
            Self::Business { .. } => ErrorKind::Business,
        }
    }

    /// HTTP status of the classified response, when one was obtained.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => None,
            Self::Http { status, .. } => StatusCode::from_u16(*status).ok(),
            Self::Business { response, .. } => Some(response.status()),
        }
    }

    /// Machine-readable failure code: the transport's own code for network
    /// failures, the embedded application code for business failures.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Network { code, .. } => code.as_deref(),
            Self::Business { code, .. } => Some(code),
            Self::Timeout { .. } | Self::Http { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Network { message, .. }
            | Self::Timeout { message, .. }
            | Self::Http { message, .. }
            | Self::Business { message, .. } => message,
        }
    }

    /// The resolved request descriptor that produced this failure.
    pub fn request(&self) -> &ResolvedRequest {
        match self {
            Self::Network { request, .. }
            | Self::Timeout { request, .. }
            | Self::Http { request, .. }
            | Self::Business { request, .. } => request,
        }
    }

    /// The classified response envelope, when one was obtained.
    pub fn response(&self) -> Option<&ResponseEnvelope> {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => None,
            Self::Http { response, .. } | Self::Business { response, .. } => Some(response),
        }
    }
}

/// Failures raised while describing a request or configuring a client,
/// before anything is dispatched.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid header name {name}: {message}")]
    InvalidHeaderName { name: String, message: String },
    #[error("invalid header value for {name}: {message}")]
    InvalidHeaderValue { name: String, message: String },
    #[error("failed to serialize request payload: {message}")]
    SerializePayload { message: String },
    #[error("failed to serialize request query: {message}")]
    SerializeQuery { message: String },
    #[error("http client requires a transport")]
    MissingTransport,
}
