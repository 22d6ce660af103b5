use std::sync::Mutex;

use crate::config::ParamValue;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn is_absolute_url(url: &str) -> bool {
    let prefix: String = url.chars().take(8).collect::<String>().to_ascii_lowercase();
    prefix.starts_with("http://") || prefix.starts_with("https://")
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

/// Percent-encodes query parameters in insertion order. List values repeat
/// the key once per element.
pub(crate) fn build_query_string(params: &[(String, ParamValue)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in params {
        match value {
            ParamValue::Single(item) => {
                serializer.append_pair(name, item);
            }
            ParamValue::List(items) => {
                for item in items {
                    serializer.append_pair(name, item);
                }
            }
        }
    }
    serializer.finish()
}

/// Appends an encoded query string to a url, using `&` when the url already
/// carries a query and `?` otherwise. Empty queries leave the url untouched.
pub(crate) fn append_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_owned();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

pub(crate) fn strip_query_for_logs(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

pub(crate) fn truncate_text(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.to_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
