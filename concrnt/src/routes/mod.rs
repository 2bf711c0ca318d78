//! REST handlers
//!
//! Every response is a `ResponseBase` envelope; service errors map to the
//! status codes in `ConcrntError::status_code`.

pub mod commit;
pub mod entity;
pub mod misc;
pub mod timeline;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::collections::HashMap;

use crate::model::ResponseBase;
use crate::types::ConcrntError;

pub fn json_ok<T: Serialize>(content: T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&ResponseBase::ok(content)).unwrap_or_default();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| internal_error())
}

pub fn error_response(err: &ConcrntError) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&ResponseBase::<()>::error(err.to_string())).unwrap_or_default();
    Response::builder()
        .status(err.status_code())
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| internal_error())
}

pub fn not_found() -> Response<Full<Bytes>> {
    error_response(&ConcrntError::NotFound("no such route".into()))
}

fn internal_error() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(Full::new(Bytes::from(r#"{"status":"error"}"#)))
        .unwrap()
}

/// Parse a query string into a key-value map. Values are taken verbatim;
/// ids and epoch labels are query-safe by construction.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    if query.is_empty() {
        return HashMap::new();
    }
    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Split a CSV query value, dropping empties.
pub fn csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing() {
        let q = parse_query("timelines=ta@x.example,tb@y.example&until=1704067200");
        assert_eq!(q["timelines"], "ta@x.example,tb@y.example");
        assert_eq!(q["until"], "1704067200");
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn csv_splitting() {
        assert_eq!(csv("a,b,,c"), vec!["a", "b", "c"]);
        assert!(csv("").is_empty());
    }
}
