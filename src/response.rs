use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ResponseKind;
use crate::transport::RawResponse;

/// The settled, owned result of a successful exchange. Envelopes carry no
/// shared mutable state: cached copies and de-duplicated deliveries are
/// plain clones.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseEnvelope {
    data: Value,
    status: StatusCode,
    headers: HeaderMap,
    cookies: Vec<String>,
    error_message: Option<String>,
}

impl ResponseEnvelope {
    pub fn new(
        data: Value,
        status: StatusCode,
        headers: HeaderMap,
        cookies: Vec<String>,
        error_message: Option<String>,
    ) -> Self {
        Self {
            data,
            status,
            headers,
            cookies,
            error_message,
        }
    }

    /// A copy of this envelope carrying a replacement payload; everything
    /// else is preserved. The transform interceptors build on this.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Decodes a raw transport response into an envelope. Unknown status
    /// codes collapse to 500 rather than failing: by the time a raw
    /// response exists, the caller must receive either an envelope or a
    /// classified error, never a decoding panic.
    pub(crate) fn from_raw(raw: RawResponse, response_kind: ResponseKind) -> Self {
        let status =
            StatusCode::from_u16(raw.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let data = match response_kind {
            ResponseKind::Json => serde_json::from_slice(&raw.body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&raw.body).into_owned())),
            ResponseKind::Text => {
                Value::String(String::from_utf8_lossy(&raw.body).into_owned())
            }
        };
        let error_message = if status.as_u16() >= 400 {
            Some(format!("http status {}", status.as_u16()))
        } else {
            None
        };
        Self::new(data, status, raw.headers, raw.cookies, error_message)
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Deserializes the payload into a typed value.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.data.clone())
    }

    pub fn text_lossy(&self) -> String {
        match &self.data {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}
