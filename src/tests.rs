use std::collections::BTreeMap;

use crate::config::ParamValue;
use crate::util::{
    append_query, build_query_string, is_absolute_url, join_base_path, strip_query_for_logs,
    truncate_text,
};

#[test]
fn join_base_path_handles_slashes() {
    assert_eq!(
        join_base_path("https://api.example.com/v1/", "/users"),
        "https://api.example.com/v1/users"
    );
    assert_eq!(
        join_base_path("https://api.example.com", "users"),
        "https://api.example.com/users"
    );
}

#[test]
fn join_base_path_tolerates_empty_sides() {
    assert_eq!(join_base_path("", "/users"), "users");
    assert_eq!(join_base_path("https://api.example.com/", ""), "https://api.example.com");
    assert_eq!(join_base_path("", ""), "");
}

#[test]
fn absolute_url_detection_ignores_case() {
    assert!(is_absolute_url("https://x.test/a"));
    assert!(is_absolute_url("HTTP://x.test/a"));
    assert!(!is_absolute_url("/v1/users"));
    assert!(!is_absolute_url("httpsomething"));
    assert!(!is_absolute_url(""));
}

#[test]
fn append_query_picks_the_right_separator() {
    assert_eq!(append_query("/users", "page=2"), "/users?page=2");
    assert_eq!(
        append_query("/users?active=true", "page=2"),
        "/users?active=true&page=2"
    );
    assert_eq!(append_query("/users", ""), "/users");
}

#[test]
fn query_string_preserves_order_and_repeats_list_keys() {
    let params = vec![
        ("b".to_owned(), ParamValue::Single("1".to_owned())),
        (
            "a".to_owned(),
            ParamValue::List(vec!["x".to_owned(), "y".to_owned()]),
        ),
    ];
    assert_eq!(build_query_string(&params), "b=1&a=x&a=y");
}

#[test]
fn query_string_encoding_round_trips_reserved_characters() {
    let params = vec![
        ("q".to_owned(), ParamValue::Single("a&b=c d".to_owned())),
        ("emoji".to_owned(), ParamValue::Single("héllo".to_owned())),
    ];
    let encoded = build_query_string(&params);

    let decoded: BTreeMap<String, String> = url::form_urlencoded::parse(encoded.as_bytes())
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    assert_eq!(decoded.get("q"), Some(&"a&b=c d".to_owned()));
    assert_eq!(decoded.get("emoji"), Some(&"héllo".to_owned()));
}

#[test]
fn strip_query_for_logs_drops_everything_after_the_question_mark() {
    assert_eq!(
        strip_query_for_logs("https://api.example.com/users?token=secret"),
        "https://api.example.com/users"
    );
    assert_eq!(strip_query_for_logs("/plain"), "/plain");
}

#[test]
fn truncate_text_keeps_short_bodies_verbatim() {
    assert_eq!(truncate_text("short"), "short");
}

#[test]
fn truncate_text_marks_long_bodies() {
    let long = "x".repeat(5000);
    let truncated = truncate_text(&long);
    assert!(truncated.ends_with("...(truncated)"));
    assert!(truncated.len() < long.len());
}
