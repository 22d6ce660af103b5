use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use http::Method;
use http::header::{HeaderName, HeaderValue};
use tracing::{Instrument, debug, info_span};

use crate::cache::CacheStore;
use crate::classify::{BusinessRule, classify_envelope, classify_transport_failure};
use crate::config::{
    ClientDefaults, RequestConfig, ResolvedRequest, ResponseKind, merge, parse_header_name,
    parse_header_value,
};
use crate::error::ConfigError;
use crate::extensions::{Clock, SystemClock};
use crate::interceptor::Interceptors;
use crate::metrics::{ClientMetrics, ClientMetricsSnapshot};
use crate::request::RequestBuilder;
use crate::response::ResponseEnvelope;
use crate::retry::{self, RetryCondition, RetryPolicy};
use crate::single_flight::{FlightFuture, SingleFlight};
use crate::transport::{Transport, TransportFlags};
use crate::util::strip_query_for_logs;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_CLIENT_NAME: &str = "reqflow";

/// Per-call resilience options for [`HttpClient::request_with_retry`].
/// Unset fields fall back to the client-level policy and cache TTL.
#[derive(Clone, Default)]
pub struct RetryOptions {
    pub(crate) retries: Option<usize>,
    pub(crate) retry_delay: Option<Duration>,
    pub(crate) max_delay: Option<Duration>,
    pub(crate) jitter_ratio: Option<f64>,
    pub(crate) condition: Option<Arc<dyn RetryCondition>>,
    pub(crate) cache: bool,
    pub(crate) cache_ttl: Option<Duration>,
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryOptions")
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter_ratio", &self.jitter_ratio)
            .field("custom_condition", &self.condition.is_some())
            .field("cache", &self.cache)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = Some(jitter_ratio);
        self
    }

    pub fn condition(mut self, condition: Arc<dyn RetryCondition>) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Enables GET memoization for this call. Non-GET requests never
    /// participate regardless of this flag.
    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = Some(cache_ttl);
        self
    }

    pub(crate) fn resolve_policy(&self, base: &RetryPolicy) -> RetryPolicy {
        let mut policy = base.clone();
        if let Some(retries) = self.retries {
            policy = policy.retries(retries);
        }
        if let Some(retry_delay) = self.retry_delay {
            policy = policy.retry_delay(retry_delay);
        }
        if let Some(max_delay) = self.max_delay {
            policy = policy.max_delay(max_delay);
        }
        if let Some(jitter_ratio) = self.jitter_ratio {
            policy = policy.jitter_ratio(jitter_ratio);
        }
        if let Some(condition) = &self.condition {
            policy = policy.condition(Arc::clone(condition));
        }
        policy
    }
}

pub struct HttpClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    defaults: ClientDefaults,
    retry_policy: RetryPolicy,
    business_rule: Option<Arc<dyn BusinessRule>>,
    clock: Arc<dyn Clock>,
    client_name: String,
    default_cache_ttl: Duration,
}

impl HttpClientBuilder {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        Self {
            transport: None,
            defaults: ClientDefaults::new(base_url.into()),
            retry_policy: RetryPolicy::disabled(),
            business_rule: None,
            clock: Arc::new(SystemClock),
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            default_cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// The capability that moves resolved requests over the wire. Required.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.defaults.headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> Result<Self, ConfigError> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.defaults.timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn response_kind(mut self, response_kind: ResponseKind) -> Self {
        self.defaults.response_kind = response_kind;
        self
    }

    pub fn transport_flags(mut self, flags: TransportFlags) -> Self {
        self.defaults.flags = flags;
        self
    }

    /// The client-level retry policy; per-call [`RetryOptions`] override it
    /// field by field.
    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn business_rule(mut self, business_rule: Arc<dyn BusinessRule>) -> Self {
        self.business_rule = Some(business_rule);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn default_cache_ttl(mut self, default_cache_ttl: Duration) -> Self {
        self.default_cache_ttl = default_cache_ttl;
        self
    }

    pub fn try_build(self) -> Result<HttpClient, ConfigError> {
        let transport = self.transport.ok_or(ConfigError::MissingTransport)?;
        Ok(HttpClient {
            defaults: self.defaults,
            transport,
            retry_policy: self.retry_policy,
            business_rule: self.business_rule,
            interceptors: Arc::new(Interceptors::new()),
            cache: Arc::new(CacheStore::new(self.clock)),
            single_flight: Arc::new(SingleFlight::new()),
            metrics: ClientMetrics::default(),
            client_name: self.client_name,
            default_cache_ttl: self.default_cache_ttl,
        })
    }

    pub fn build(self) -> HttpClient {
        self.try_build()
            .unwrap_or_else(|error| panic!("failed to build reqflow http client: {error}"))
    }
}

/// The request pipeline facade. Owned and explicitly constructed; clones
/// share the interceptor chains, the cache, the pending-flight map, and the
/// metrics of the instance they were cloned from.
#[derive(Clone)]
pub struct HttpClient {
    defaults: ClientDefaults,
    transport: Arc<dyn Transport>,
    retry_policy: RetryPolicy,
    business_rule: Option<Arc<dyn BusinessRule>>,
    interceptors: Arc<Interceptors>,
    cache: Arc<CacheStore>,
    single_flight: Arc<SingleFlight>,
    metrics: ClientMetrics,
    client_name: String,
    default_cache_ttl: Duration,
}

impl HttpClient {
    pub fn builder(base_url: impl Into<String>) -> HttpClientBuilder {
        HttpClientBuilder::new(base_url)
    }

    pub fn interceptors(&self) -> &Interceptors {
        &self.interceptors
    }

    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The cache/de-duplication identity this descriptor resolves to.
    pub fn fingerprint(&self, config: &RequestConfig) -> String {
        merge(&self.defaults, config).fingerprint()
    }

    /// Drops every cached envelope, or only those whose key contains the
    /// pattern.
    pub fn clear_cache(&self, pattern: Option<&str>) {
        self.cache.clear(pattern);
    }

    /// Forgets the in-flight registration for a fingerprint. The underlying
    /// transport call, if already started, is not interrupted; its late
    /// result is absorbed and never cached.
    pub fn cancel_request(&self, fingerprint: &str) -> bool {
        self.single_flight.cancel(fingerprint)
    }

    pub fn cancel_all_requests(&self) {
        self.single_flight.cancel_all();
    }

    pub fn request_builder(&self, method: Method, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, url.into())
    }

    pub fn get(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request_builder(Method::GET, url)
    }

    pub fn post(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request_builder(Method::POST, url)
    }

    pub fn put(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request_builder(Method::PUT, url)
    }

    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request_builder(Method::PATCH, url)
    }

    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request_builder(Method::DELETE, url)
    }

    /// One merged, intercepted, classified attempt. No cache, no retry, no
    /// de-duplication.
    pub async fn request(&self, config: RequestConfig) -> crate::Result<ResponseEnvelope> {
        self.metrics.record_request_started();
        let _in_flight = self.metrics.enter_in_flight();
        let started_at = Instant::now();
        let result = self.request_inner(config).await;
        self.metrics
            .record_request_completed(&result, started_at.elapsed());
        result
    }

    async fn request_inner(&self, config: RequestConfig) -> crate::Result<ResponseEnvelope> {
        let resolved = merge(&self.defaults, &config);
        let resolved = match self.interceptors.request.run(resolved).await {
            Ok(resolved) => resolved,
            Err(error) => return self.interceptors.response.recover(error).await,
        };
        let outcome = dispatch_once(
            Arc::clone(&self.transport),
            self.business_rule.clone(),
            self.client_name.clone(),
            resolved,
            1,
            1,
        )
        .await;
        match outcome {
            Ok(envelope) => self.interceptors.response.run(envelope).await,
            Err(error) => self.interceptors.response.recover(error).await,
        }
    }

    /// The resilient path: cache lookup and de-duplication happen once per
    /// outer call, the retry schedule wraps only the dispatch/classify span,
    /// and concurrent identical calls share one retried outcome.
    pub async fn request_with_retry(
        &self,
        config: RequestConfig,
        options: RetryOptions,
    ) -> crate::Result<ResponseEnvelope> {
        self.metrics.record_request_started();
        let _in_flight = self.metrics.enter_in_flight();
        let started_at = Instant::now();
        let result = self.request_with_retry_inner(config, options).await;
        self.metrics
            .record_request_completed(&result, started_at.elapsed());
        result
    }

    async fn request_with_retry_inner(
        &self,
        config: RequestConfig,
        options: RetryOptions,
    ) -> crate::Result<ResponseEnvelope> {
        let resolved = merge(&self.defaults, &config);
        // Identity is fixed before the interceptor pass so traffic-shaping
        // handlers (timestamps, auth headers) cannot split the cache and
        // de-duplication keys of otherwise identical calls.
        let fingerprint = resolved.fingerprint();
        let resolved = match self.interceptors.request.run(resolved).await {
            Ok(resolved) => resolved,
            Err(error) => return self.interceptors.response.recover(error).await,
        };

        let cache_enabled = options.cache && resolved.method == Method::GET;
        if cache_enabled && let Some(hit) = self.cache.get(&fingerprint) {
            self.metrics.record_cache_hit();
            debug!(fingerprint = %fingerprint, "serving cached response");
            return Ok(hit);
        }

        let policy = options.resolve_policy(&self.retry_policy);
        let flight = self
            .single_flight
            .execute(&fingerprint, self.retried_dispatch(resolved, policy))
            .await;
        if !flight.led {
            self.metrics.record_flight_joined();
        }

        match flight.result {
            Ok(envelope) => {
                let processed = self.interceptors.response.run(envelope).await?;
                if cache_enabled && flight.registration_survived {
                    let cache_ttl = options.cache_ttl.unwrap_or(self.default_cache_ttl);
                    self.cache.set(fingerprint, processed.clone(), cache_ttl);
                }
                Ok(processed)
            }
            Err(error) => self.interceptors.response.recover(error).await,
        }
    }

    fn retried_dispatch(&self, resolved: ResolvedRequest, policy: RetryPolicy) -> FlightFuture {
        let transport = Arc::clone(&self.transport);
        let business_rule = self.business_rule.clone();
        let client_name = self.client_name.clone();
        let metrics = self.metrics.clone();
        async move {
            let total_attempts = policy.total_attempts();
            retry::run_with_policy(
                &policy,
                move |attempt| {
                    dispatch_once(
                        Arc::clone(&transport),
                        business_rule.clone(),
                        client_name.clone(),
                        resolved.clone(),
                        attempt + 1,
                        total_attempts,
                    )
                    .boxed()
                },
                move |_attempt, _error, _delay| metrics.record_retry(),
            )
            .await
        }
        .boxed()
    }
}

/// One transport exchange plus classification. Pure pipeline: the raw
/// outcome always leaves here as an envelope or a classified error.
fn dispatch_once(
    transport: Arc<dyn Transport>,
    business_rule: Option<Arc<dyn BusinessRule>>,
    client_name: String,
    resolved: ResolvedRequest,
    attempt: usize,
    max_attempts: usize,
) -> impl Future<Output = crate::Result<ResponseEnvelope>> + Send + 'static {
    let span = info_span!(
        "reqflow.request",
        client = %client_name,
        method = %resolved.method,
        url = %strip_query_for_logs(&resolved.url),
        attempt,
        max_attempts
    );
    async move {
        debug!("dispatching request");
        let started_at = Instant::now();

        match transport.send(resolved.clone()).await {
            Ok(raw) => {
                debug!(
                    status = raw.status,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "transport completed"
                );
                let envelope = ResponseEnvelope::from_raw(raw, resolved.response_kind);
                classify_envelope(envelope, business_rule.as_deref(), &resolved)
            }
            Err(failure) => {
                debug!(
                    kind = %failure.kind,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "transport failed"
                );
                Err(classify_transport_failure(failure, &resolved))
            }
        }
    }
    .instrument(span)
}
