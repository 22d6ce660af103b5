use std::sync::Arc;
use std::time::Duration;

use http::Method;
use http::header::{HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;

use crate::client::{HttpClient, RetryOptions};
use crate::config::{ParamValue, RequestConfig, ResponseKind};
use crate::error::ConfigError;
use crate::response::ResponseEnvelope;
use crate::retry::RetryCondition;

/// Fluent construction of one call. `send` dispatches a single attempt;
/// `send_with_retry` goes through the resilient path with whatever retry
/// and cache options were set here.
pub struct RequestBuilder<'a> {
    client: &'a HttpClient,
    config: RequestConfig,
    options: RetryOptions,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a HttpClient, method: Method, url: String) -> Self {
        Self {
            client,
            config: RequestConfig::new(url).method(method),
            options: RetryOptions::default(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.config = self.config.param(name, value);
        self
    }

    pub fn params<K, V, I>(mut self, params: I) -> Self
    where
        K: Into<String>,
        V: Into<ParamValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.config = self.config.params(params);
        self
    }

    /// Serializes a struct into query parameters.
    pub fn query<T>(mut self, params: &T) -> Result<Self, ConfigError>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_urlencoded::to_string(params).map_err(|error| {
            ConfigError::SerializeQuery {
                message: error.to_string(),
            }
        })?;
        for (name, value) in url::form_urlencoded::parse(encoded.as_bytes()) {
            self.config = self.config.param(name.into_owned(), value.into_owned());
        }
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.config = self.config.header(name, value);
        self
    }

    pub fn try_header(mut self, name: &str, value: &str) -> Result<Self, ConfigError> {
        self.config = self.config.try_header(name, value)?;
        Ok(self)
    }

    pub fn data(mut self, data: Value) -> Self {
        self.config = self.config.data(data);
        self
    }

    /// Serializes the payload as the request body.
    pub fn json<T>(self, payload: &T) -> Result<Self, ConfigError>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_value(payload).map_err(|error| ConfigError::SerializePayload {
            message: error.to_string(),
        })?;
        Ok(self.data(data))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.timeout(timeout);
        self
    }

    pub fn response_kind(mut self, response_kind: ResponseKind) -> Self {
        self.config = self.config.response_kind(response_kind);
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.options = self.options.retries(retries);
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.options = self.options.retry_delay(retry_delay);
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.options = self.options.max_delay(max_delay);
        self
    }

    pub fn retry_condition(mut self, condition: Arc<dyn RetryCondition>) -> Self {
        self.options = self.options.condition(condition);
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.options = self.options.cache(cache);
        self
    }

    pub fn cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.options = self.options.cache_ttl(cache_ttl);
        self
    }

    /// Single attempt: no cache, no retry, no de-duplication.
    pub async fn send(self) -> crate::Result<ResponseEnvelope> {
        self.client.request(self.config).await
    }

    /// Full resilient path: cache lookup, de-duplication, and the retry
    /// schedule configured on this builder.
    pub async fn send_with_retry(self) -> crate::Result<ResponseEnvelope> {
        self.client.request_with_retry(self.config, self.options).await
    }
}
