//! Timeline reads: single, batch, recent window, chunk RPC

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::Full;
use hyper::Response;
use std::collections::HashMap;
use std::sync::Arc;

use crate::server::AppState;
use crate::types::ConcrntError;

use super::{csv, error_response, json_ok, parse_query};

/// Hard cap on merged recent reads.
const RECENT_LIMIT_MAX: usize = 100;
const RECENT_LIMIT_DEFAULT: usize = 30;

const QUERY_LIMIT_DEFAULT: i64 = 30;

pub async fn get_timeline(state: Arc<AppState>, id: &str) -> Response<Full<Bytes>> {
    match state.timeline.get_timeline_auto_domain(id).await {
        Ok(timeline) => json_ok(timeline),
        Err(e) => error_response(&e),
    }
}

pub async fn get_timelines(state: Arc<AppState>, query: &str) -> Response<Full<Bytes>> {
    let params = parse_query(query);

    if let Some(schema) = params.get("schema") {
        return match state.timeline.list_timeline_by_schema(schema).await {
            Ok(timelines) => json_ok(timelines),
            Err(e) => error_response(&e),
        };
    }
    if let Some(author) = params.get("author") {
        return match state.timeline.list_timeline_by_author(author).await {
            Ok(timelines) => json_ok(timelines),
            Err(e) => error_response(&e),
        };
    }

    let Some(timelines) = params.get("timelines") else {
        return error_response(&ConcrntError::InvalidInput(
            "timelines, schema or author parameter is required".into(),
        ));
    };

    let mut found = Vec::new();
    for id in csv(timelines) {
        if let Ok(timeline) = state.timeline.get_timeline_auto_domain(&id).await {
            found.push(timeline);
        }
    }
    json_ok(found)
}

pub async fn get_recent(state: Arc<AppState>, query: &str) -> Response<Full<Bytes>> {
    let params = parse_query(query);
    let until = parse_unix(params.get("until")).unwrap_or_else(Utc::now);
    let limit = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(RECENT_LIMIT_DEFAULT)
        .min(RECENT_LIMIT_MAX);

    let result = if let Some(subscription) = params.get("subscription") {
        state
            .timeline
            .get_recent_items_from_subscription(subscription, until, limit)
            .await
    } else if let Some(timelines) = params.get("timelines") {
        state
            .timeline
            .get_recent_items(&csv(timelines), until, limit)
            .await
    } else {
        return error_response(&ConcrntError::InvalidInput(
            "timelines or subscription parameter is required".into(),
        ));
    };

    match result {
        Ok(items) => json_ok(items),
        Err(e) => error_response(&e),
    }
}

pub async fn get_chunks(state: Arc<AppState>, query: &str) -> Response<Full<Bytes>> {
    let params = parse_query(query);
    let Some(timelines) = params.get("timelines") else {
        return error_response(&ConcrntError::InvalidInput(
            "timelines parameter is required".into(),
        ));
    };
    let time = parse_unix(params.get("time")).unwrap_or_else(Utc::now);

    match state.timeline.get_chunks(&csv(timelines), time).await {
        Ok(chunks) => json_ok(chunks),
        Err(e) => error_response(&e),
    }
}

/// Peer RPC: resolve chunk iterators for timelines hosted here.
pub async fn get_chunk_itrs(state: Arc<AppState>, query: &str) -> Response<Full<Bytes>> {
    let params = parse_query(query);
    let (Some(timelines), Some(epoch)) = (params.get("timelines"), params.get("epoch")) else {
        return error_response(&ConcrntError::InvalidInput(
            "timelines and epoch parameters are required".into(),
        ));
    };

    let itrs = state.timeline.get_chunk_itrs(&csv(timelines), epoch).await;
    json_ok(itrs)
}

/// Peer RPC: load chunk bodies. `timelines` and `epochs` are paired CSVs.
pub async fn get_chunk_bodies(state: Arc<AppState>, query: &str) -> Response<Full<Bytes>> {
    let params = parse_query(query);
    let (Some(timelines), Some(epochs)) = (params.get("timelines"), params.get("epochs")) else {
        return error_response(&ConcrntError::InvalidInput(
            "timelines and epochs parameters are required".into(),
        ));
    };

    let timelines = csv(timelines);
    let epochs = csv(epochs);
    if timelines.len() != epochs.len() {
        return error_response(&ConcrntError::InvalidInput(
            "timelines and epochs must pair up".into(),
        ));
    }

    let request: HashMap<String, String> = timelines.into_iter().zip(epochs).collect();
    let bodies = state.timeline.get_chunk_bodies(&request).await;
    json_ok(bodies)
}

pub async fn query(state: Arc<AppState>, id: &str, query: &str) -> Response<Full<Bytes>> {
    let params = parse_query(query);
    let until = parse_unix(params.get("until")).unwrap_or_else(Utc::now);
    let limit = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(QUERY_LIMIT_DEFAULT)
        .min(RECENT_LIMIT_MAX as i64);

    match state
        .timeline
        .query(
            id,
            params.get("schema").map(String::as_str).unwrap_or(""),
            params.get("owner").map(String::as_str).unwrap_or(""),
            params.get("author").map(String::as_str).unwrap_or(""),
            until,
            limit,
        )
        .await
    {
        Ok(items) => json_ok(items),
        Err(e) => error_response(&e),
    }
}

fn parse_unix(value: Option<&String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|unix| Utc.timestamp_opt(unix, 0).single())
}
