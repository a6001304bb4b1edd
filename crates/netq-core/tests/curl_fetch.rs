//! CurlFetcher against a local HTTP server.

mod common;

use std::time::Duration;

use netq_core::{CurlFetcher, Fetch, FetchError, FormData};

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn get_returns_body() {
    let base = common::http_server::start();
    let body = CurlFetcher::default()
        .fetch(&format!("{}/hello", base), None, TIMEOUT)
        .unwrap();
    assert_eq!(body, b"hello netq");
}

#[test]
fn user_agent_is_sent() {
    let base = common::http_server::start();
    let body = CurlFetcher::new("netq-test/0.1")
        .fetch(&format!("{}/ua", base), None, TIMEOUT)
        .unwrap();
    assert_eq!(body, b"netq-test/0.1");
}

#[test]
fn form_is_posted_url_encoded() {
    let base = common::http_server::start();
    let form = FormData::new().with("name", "a b").with("x", "1&2");
    let body = CurlFetcher::default()
        .fetch(&format!("{}/echo", base), Some(&form), TIMEOUT)
        .unwrap();
    let text = String::from_utf8(body).unwrap();
    assert_eq!(
        text,
        "application/x-www-form-urlencoded\nname=a+b&x=1%262"
    );
}

#[test]
fn non_success_status_is_http_error() {
    let base = common::http_server::start();
    let err = CurlFetcher::default()
        .fetch(&format!("{}/missing", base), None, TIMEOUT)
        .unwrap_err();
    assert_eq!(err, FetchError::Http(404));
}

#[test]
fn refused_connection_is_connection_error() {
    let err = CurlFetcher::default()
        .fetch(&common::http_server::refused_url(), None, TIMEOUT)
        .unwrap_err();
    assert!(matches!(err, FetchError::Connection(_)), "got {:?}", err);
}

#[test]
fn slow_response_times_out() {
    let base = common::http_server::start();
    let err = CurlFetcher::default()
        .fetch(&format!("{}/slow", base), None, Duration::from_millis(300))
        .unwrap_err();
    assert_eq!(err, FetchError::Timeout);
}
