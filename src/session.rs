//! Stock interceptors for the common session concerns: bearer-token
//! injection, client metadata headers, cache-busting timestamps, and token
//! expiry on 401. Nothing here is wired implicitly; the embedding
//! application registers what it wants on a client it owns.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::FutureExt;
use http::Method;
use http::header::AUTHORIZATION;
use http::{HeaderName, HeaderValue};

use crate::config::{ResolvedRequest, parse_header_name, parse_header_value};
use crate::error::ConfigError;
use crate::extensions::TokenStorage;
use crate::interceptor::{FulfilledHandler, Handled, RejectedHandler};
use crate::response::ResponseEnvelope;
use crate::util::append_query;

/// Storage key the token interceptors read and clear.
pub const TOKEN_STORAGE_KEY: &str = "token";

const CLIENT_NAME_HEADER: &str = "x-client-name";
const CLIENT_VERSION_HEADER: &str = "x-client-version";
const CACHE_BUSTER_PARAM: &str = "_t";

/// Adds `authorization: Bearer <token>` when the storage holds a token.
/// Requests go out untouched when it does not, or when the stored token is
/// not a valid header value.
pub fn bearer_token(storage: Arc<dyn TokenStorage>) -> FulfilledHandler<ResolvedRequest> {
    Arc::new(move |mut request: ResolvedRequest| {
        let storage = Arc::clone(&storage);
        async move {
            if let Some(token) = storage.get(TOKEN_STORAGE_KEY)
                && let Ok(value) = format!("Bearer {token}").parse::<HeaderValue>()
            {
                request.headers.insert(AUTHORIZATION, value);
            }
            Ok(request)
        }
        .boxed()
    })
}

/// Stamps every request with the embedding application's name and version.
/// Values are validated once, at construction.
pub fn client_metadata(
    client_name: &str,
    client_version: &str,
) -> Result<FulfilledHandler<ResolvedRequest>, ConfigError> {
    let headers: Vec<(HeaderName, HeaderValue)> = vec![
        (
            parse_header_name(CLIENT_NAME_HEADER)?,
            parse_header_value(CLIENT_NAME_HEADER, client_name)?,
        ),
        (
            parse_header_name(CLIENT_VERSION_HEADER)?,
            parse_header_value(CLIENT_VERSION_HEADER, client_version)?,
        ),
    ];
    Ok(Arc::new(move |mut request: ResolvedRequest| {
        let headers = headers.clone();
        async move {
            for (name, value) in headers {
                request.headers.insert(name, value);
            }
            Ok(request)
        }
        .boxed()
    }))
}

/// Appends a `_t=<epoch millis>` query parameter to GET requests so
/// intermediary caches never serve a stale copy. The pipeline's own cache
/// and de-duplication identity is derived before interceptors run, so this
/// does not defeat them.
pub fn cache_buster() -> FulfilledHandler<ResolvedRequest> {
    Arc::new(|mut request: ResolvedRequest| {
        async move {
            if request.method == Method::GET {
                let now_ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis();
                request.url = append_query(&request.url, &format!("{CACHE_BUSTER_PARAM}={now_ms}"));
            }
            Ok(request)
        }
        .boxed()
    })
}

/// Observes failures on the response side and clears the stored token when
/// the server answers 401. The failure is always rethrown untouched.
pub fn clear_token_on_unauthorized(
    storage: Arc<dyn TokenStorage>,
) -> RejectedHandler<ResponseEnvelope> {
    Arc::new(move |error| {
        let storage = Arc::clone(&storage);
        async move {
            if error.status().map(|status| status.as_u16()) == Some(401) {
                storage.remove(TOKEN_STORAGE_KEY);
            }
            Handled::Rethrow(error)
        }
        .boxed()
    })
}
