//! Entity reads (peer-facing: includes the affiliation proof)

use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;
use std::sync::Arc;

use crate::crypto;
use crate::server::AppState;

use super::{error_response, json_ok, parse_query};

pub async fn get_entity(state: Arc<AppState>, id: &str, query: &str) -> Response<Full<Bytes>> {
    let params = parse_query(query);

    let result = if crypto::is_ccid(id) {
        match params.get("hint") {
            Some(hint) => state.entity.get_with_hint(id, hint).await,
            None => state.entity.get(id).await,
        }
    } else {
        // anything else is treated as a DNS alias
        state.entity.get_by_alias(id).await
    };

    match result {
        Ok(entity) => json_ok(entity),
        Err(e) => error_response(&e),
    }
}

pub async fn list_entities(state: Arc<AppState>) -> Response<Full<Bytes>> {
    match state.entity.list().await {
        Ok(entities) => json_ok(entities),
        Err(e) => error_response(&e),
    }
}
