//! `reqflow` is a resilient HTTP request pipeline for applications that
//! bring their own transport: configuration merging, ordered interceptor
//! chains, retry with exponential backoff, TTL-bounded GET caching, and
//! single-flight de-duplication of identical in-flight calls.
//!
//! The crate never opens a socket. It resolves descriptors, threads them
//! through interceptors, and hands them to a [`Transport`] implementation
//! supplied at construction; whatever comes back is classified into a
//! [`ResponseEnvelope`] or a typed [`Error`] before the caller sees it.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use futures_core::future::BoxFuture;
//! use futures_util::FutureExt;
//! use reqflow::{
//!     HttpClient, RawResponse, ResolvedRequest, RetryPolicy, Transport, TransportFailure,
//! };
//!
//! struct LoopbackTransport;
//!
//! impl Transport for LoopbackTransport {
//!     fn send(
//!         &self,
//!         _request: ResolvedRequest,
//!     ) -> BoxFuture<'_, Result<RawResponse, TransportFailure>> {
//!         async {
//!             Ok(RawResponse {
//!                 status: 200,
//!                 headers: Default::default(),
//!                 body: Bytes::from_static(b"{\"users\": []}"),
//!                 cookies: Vec::new(),
//!             })
//!         }
//!         .boxed()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::builder("https://api.example.com")
//!         .transport(Arc::new(LoopbackTransport))
//!         .request_timeout(Duration::from_secs(5))
//!         .retry_policy(RetryPolicy::standard())
//!         .build();
//!
//!     let users = client
//!         .get("/v1/users")
//!         .param("page", 1)
//!         .cache(true)
//!         .cache_ttl(Duration::from_secs(5))
//!         .send_with_retry()
//!         .await?;
//!     println!("status={} users={}", users.status(), users.data());
//!     Ok(())
//! }
//! ```
//!
//! # Recommended Defaults
//!
//! - Keep the client-level policy at [`RetryPolicy::disabled`] and opt into
//!   retries per call; reserve [`RetryPolicy::standard`] for clients whose
//!   traffic is idempotent.
//! - Register session interceptors ([`session`]) on the client you
//!   construct, not on a shared global.

mod cache;
mod classify;
mod client;
mod config;
mod error;
mod extensions;
mod interceptor;
mod metrics;
mod request;
mod response;
mod retry;
pub mod session;
mod single_flight;
mod transport;
mod util;

pub use crate::classify::{BusinessFailure, BusinessRule, CodeFieldRule};
pub use crate::client::{HttpClient, HttpClientBuilder, RetryOptions};
pub use crate::config::{ParamValue, RequestConfig, ResolvedRequest, ResponseKind};
pub use crate::error::{ConfigError, Error, ErrorKind};
pub use crate::extensions::{Clock, MemoryStorage, SystemClock, TokenStorage};
pub use crate::interceptor::{
    FulfilledHandler, Handled, InterceptorChain, Interceptors, RejectedHandler,
};
pub use crate::metrics::ClientMetricsSnapshot;
pub use crate::request::RequestBuilder;
pub use crate::response::ResponseEnvelope;
pub use crate::retry::{DefaultRetryCondition, RetryCondition, RetryPolicy};
pub use crate::transport::{
    RawResponse, Transport, TransportErrorKind, TransportFailure, TransportFlags,
};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        BusinessRule, ClientMetricsSnapshot, CodeFieldRule, ConfigError, Error, ErrorKind,
        Handled, HttpClient, HttpClientBuilder, RawResponse, RequestBuilder, RequestConfig,
        ResolvedRequest, ResponseEnvelope, ResponseKind, RetryCondition, RetryOptions,
        RetryPolicy, TokenStorage, Transport, TransportErrorKind, TransportFailure,
        TransportFlags,
    };
}

#[cfg(test)]
mod tests;
