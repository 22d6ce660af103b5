use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde_json::Value;

use crate::error::ConfigError;
use crate::transport::TransportFlags;
use crate::util::{append_query, build_query_string, is_absolute_url, join_base_path};

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How a raw response body is decoded into an envelope payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseKind {
    /// Parse the body as JSON; bodies that fail to parse fall back to a
    /// string payload.
    #[default]
    Json,
    /// Keep the body as a lossy UTF-8 string payload.
    Text,
}

/// A query parameter value: one scalar, or a list that repeats the key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    Single(String),
    List(Vec<String>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(values: Vec<&str>) -> Self {
        Self::List(values.into_iter().map(str::to_owned).collect())
    }
}

macro_rules! param_value_from_display {
    ($($source:ty),+ $(,)?) => {
        $(impl From<$source> for ParamValue {
            fn from(value: $source) -> Self {
                Self::Single(value.to_string())
            }
        })+
    };
}

param_value_from_display!(bool, i32, i64, u32, u64, f64);

/// The call-level request descriptor. Unset fields fall back to the client
/// defaults during merging; set fields always win.
#[derive(Clone, Debug, Default)]
pub struct RequestConfig {
    pub(crate) url: String,
    pub(crate) method: Option<Method>,
    pub(crate) data: Option<Value>,
    pub(crate) params: Vec<(String, ParamValue)>,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
    pub(crate) base_url: Option<String>,
    pub(crate) response_kind: Option<ResponseKind>,
    pub(crate) ssl_verify: Option<bool>,
    pub(crate) with_credentials: Option<bool>,
    pub(crate) enable_http2: Option<bool>,
    pub(crate) enable_cookie: Option<bool>,
}

impl RequestConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets a query parameter. Keys are unique at the descriptor level:
    /// setting an existing key replaces its value in place, preserving the
    /// original position.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    pub fn params<K, V, I>(mut self, params: I) -> Self
    where
        K: Into<String>,
        V: Into<ParamValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (name, value) in params {
            self = self.param(name, value);
        }
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self, ConfigError> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn response_kind(mut self, response_kind: ResponseKind) -> Self {
        self.response_kind = Some(response_kind);
        self
    }

    pub fn ssl_verify(mut self, ssl_verify: bool) -> Self {
        self.ssl_verify = Some(ssl_verify);
        self
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = Some(with_credentials);
        self
    }

    pub fn enable_http2(mut self, enable_http2: bool) -> Self {
        self.enable_http2 = Some(enable_http2);
        self
    }

    pub fn enable_cookie(mut self, enable_cookie: bool) -> Self {
        self.enable_cookie = Some(enable_cookie);
        self
    }
}

/// The per-client defaults that call-level descriptors are merged over.
#[derive(Clone, Debug)]
pub struct ClientDefaults {
    pub(crate) base_url: String,
    pub(crate) method: Method,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Duration,
    pub(crate) response_kind: ResponseKind,
    pub(crate) flags: TransportFlags,
}

impl ClientDefaults {
    pub(crate) fn new(base_url: String) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            base_url,
            method: Method::GET,
            headers,
            timeout: DEFAULT_TIMEOUT,
            response_kind: ResponseKind::Json,
            flags: TransportFlags::default(),
        }
    }
}

/// The immutable descriptor handed to the transport. Each pipeline layer
/// produces a new value rather than mutating the caller's config.
#[derive(Clone, Debug)]
pub struct ResolvedRequest {
    pub method: Method,
    /// Fully resolved url: base-joined, with the encoded query appended.
    pub url: String,
    pub headers: HeaderMap,
    pub data: Option<Value>,
    pub timeout: Duration,
    pub flags: TransportFlags,
    pub response_kind: ResponseKind,
    pub(crate) query_string: String,
}

impl ResolvedRequest {
    /// The request payload serialized for the wire, when one is present.
    pub fn body_bytes(&self) -> Option<Bytes> {
        self.data
            .as_ref()
            .and_then(|data| serde_json::to_vec(data).ok())
            .map(Bytes::from)
    }

    /// The identity key shared by the cache and the de-duplication map:
    /// method, resolved url, serialized body, and serialized query.
    pub fn fingerprint(&self) -> String {
        let body = self
            .data
            .as_ref()
            .map(|data| data.to_string())
            .unwrap_or_default();
        format!(
            "{}:{}:{}:{}",
            self.method, self.url, body, self.query_string
        )
    }
}

/// Merges client defaults with a call-level descriptor. Merging is total:
/// every call-level field that is set overrides the default, header maps
/// merge key-by-key with the call side winning, and nothing here can fail.
pub(crate) fn merge(defaults: &ClientDefaults, config: &RequestConfig) -> ResolvedRequest {
    let method = config.method.clone().unwrap_or_else(|| defaults.method.clone());

    let mut headers = defaults.headers.clone();
    for (name, value) in &config.headers {
        headers.insert(name.clone(), value.clone());
    }

    let base_url = config.base_url.as_deref().unwrap_or(&defaults.base_url);
    let url = if !is_absolute_url(&config.url) && !base_url.is_empty() {
        join_base_path(base_url, &config.url)
    } else {
        config.url.clone()
    };
    let query_string = build_query_string(&config.params);
    let url = append_query(&url, &query_string);

    let flags = TransportFlags {
        ssl_verify: config.ssl_verify.unwrap_or(defaults.flags.ssl_verify),
        with_credentials: config
            .with_credentials
            .unwrap_or(defaults.flags.with_credentials),
        enable_http2: config.enable_http2.unwrap_or(defaults.flags.enable_http2),
        enable_cookie: config.enable_cookie.unwrap_or(defaults.flags.enable_cookie),
    };

    ResolvedRequest {
        method,
        url,
        headers,
        data: config.data.clone(),
        timeout: config.timeout.unwrap_or(defaults.timeout),
        flags,
        response_kind: config.response_kind.unwrap_or(defaults.response_kind),
        query_string,
    }
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, ConfigError> {
    name.parse().map_err(|error: http::header::InvalidHeaderName| {
        ConfigError::InvalidHeaderName {
            name: name.to_owned(),
            message: error.to_string(),
        }
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, ConfigError> {
    value
        .parse()
        .map_err(|error: http::header::InvalidHeaderValue| ConfigError::InvalidHeaderValue {
            name: name.to_owned(),
            message: error.to_string(),
        })
}
