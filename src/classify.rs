use serde_json::Value;

use crate::config::ResolvedRequest;
use crate::error::Error;
use crate::response::ResponseEnvelope;
use crate::transport::{TransportErrorKind, TransportFailure};
use crate::util::truncate_text;

/// An embedded application failure extracted from a technically-successful
/// response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusinessFailure {
    pub code: String,
    pub message: String,
}

/// A caller-supplied convention for reading an embedded application status
/// out of a response payload. Inspection is pure: no I/O, no mutation.
pub trait BusinessRule: Send + Sync {
    fn inspect(&self, response: &ResponseEnvelope) -> Option<BusinessFailure>;
}

/// The common `{"code": …, "message": …}` convention: a numeric code field
/// outside the success set marks the response as failed.
#[derive(Clone, Debug)]
pub struct CodeFieldRule {
    code_field: String,
    message_field: String,
    success_codes: Vec<i64>,
}

impl CodeFieldRule {
    pub fn new(code_field: impl Into<String>, message_field: impl Into<String>) -> Self {
        Self {
            code_field: code_field.into(),
            message_field: message_field.into(),
            success_codes: vec![0, 200],
        }
    }

    pub fn success_codes(mut self, codes: impl IntoIterator<Item = i64>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }
}

impl Default for CodeFieldRule {
    fn default() -> Self {
        Self::new("code", "message")
    }
}

impl BusinessRule for CodeFieldRule {
    fn inspect(&self, response: &ResponseEnvelope) -> Option<BusinessFailure> {
        let object = response.data().as_object()?;
        let code = object.get(&self.code_field)?.as_i64()?;
        if self.success_codes.contains(&code) {
            return None;
        }
        let message = object
            .get(&self.message_field)
            .and_then(Value::as_str)
            .unwrap_or("business request failed")
            .to_owned();
        Some(BusinessFailure {
            code: code.to_string(),
            message,
        })
    }
}

/// Maps a transport-level failure (no status obtained) to its error kind.
pub(crate) fn classify_transport_failure(
    failure: TransportFailure,
    request: &ResolvedRequest,
) -> Error {
    match failure.kind {
        TransportErrorKind::Timeout => Error::Timeout {
            timeout_ms: request.timeout.as_millis().min(u64::MAX as u128) as u64,
            message: failure.message,
            request: Box::new(request.clone()),
        },
        kind => Error::Network {
            kind,
            message: failure.message,
            code: failure.code,
            request: Box::new(request.clone()),
        },
    }
}

/// Classifies a decoded envelope: status >= 400 is an http failure, and a
/// success status whose payload trips the business rule is a business
/// failure. Everything else passes through untouched.
pub(crate) fn classify_envelope(
    envelope: ResponseEnvelope,
    rule: Option<&dyn BusinessRule>,
    request: &ResolvedRequest,
) -> Result<ResponseEnvelope, Error> {
    let status = envelope.status().as_u16();
    if status >= 400 {
        return Err(Error::Http {
            status,
            message: truncate_text(&envelope.text_lossy()),
            request: Box::new(request.clone()),
            response: Box::new(envelope),
        });
    }

    if let Some(rule) = rule
        && let Some(failure) = rule.inspect(&envelope)
    {
        return Err(Error::Business {
            code: failure.code,
            message: failure.message,
            request: Box::new(request.clone()),
            response: Box::new(envelope),
        });
    }

    Ok(envelope)
}
