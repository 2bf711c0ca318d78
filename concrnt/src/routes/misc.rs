//! Health, domain registry, passport and resource reads

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::sync::Arc;

use serde::Serialize;

use crate::server::AppState;
use crate::types::ConcrntError;

use super::{error_response, json_ok};

pub async fn health(state: Arc<AppState>) -> Response<Full<Bytes>> {
    match state.db.ping().await {
        Ok(()) => json_ok("ok"),
        Err(e) => error_response(&e),
    }
}

#[derive(Serialize)]
struct ServerStatus {
    entities: i64,
    timelines: i64,
    messages: i64,
    realtime_connections: i64,
}

/// Census of this domain, served to peers and dashboards.
pub async fn status(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let entities = state.entity.count().await.unwrap_or_default();
    let timelines = state.timeline.count().await.unwrap_or_default();
    let messages = state.message.count().await.unwrap_or_default();

    json_ok(ServerStatus {
        entities,
        timelines,
        messages,
        realtime_connections: state.timeline.current_realtime_connection_count(),
    })
}

/// Subscriptions owned by the authenticated requester.
pub async fn list_own_subscriptions(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let principal = match state.auth.identify(req.headers()).await {
        Ok(principal) => principal,
        Err(e) => return error_response(&e),
    };
    if principal.requester_id.is_empty() {
        return error_response(&ConcrntError::Unauthorized("requester not found".into()));
    }

    match state
        .subscription
        .get_own_subscriptions(&principal.requester_id)
        .await
    {
        Ok(subscriptions) => json_ok(subscriptions),
        Err(e) => error_response(&e),
    }
}

pub async fn get_own_domain(state: Arc<AppState>) -> Response<Full<Bytes>> {
    json_ok(state.domain.self_domain())
}

pub async fn get_domain(state: Arc<AppState>, id: &str) -> Response<Full<Bytes>> {
    match state.domain.get(id).await {
        Ok(domain) => json_ok(domain),
        Err(e) => error_response(&e),
    }
}

pub async fn list_domains(state: Arc<AppState>) -> Response<Full<Bytes>> {
    match state.domain.list().await {
        Ok(domains) => json_ok(domains),
        Err(e) => error_response(&e),
    }
}

/// Issue a passport for the authenticated local user.
pub async fn get_passport(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let principal = match state.auth.identify(req.headers()).await {
        Ok(principal) => principal,
        Err(e) => return error_response(&e),
    };
    if principal.requester_id.is_empty() {
        return error_response(&ConcrntError::Unauthorized("requester not found".into()));
    }

    let keys = state
        .key
        .get_all(&principal.requester_id)
        .await
        .unwrap_or_default();

    match state.auth.issue_passport(&principal.requester_id, keys).await {
        Ok(passport) => json_ok(passport),
        Err(e) => error_response(&e),
    }
}

pub async fn get_message(state: Arc<AppState>, id: &str) -> Response<Full<Bytes>> {
    match state.message.get(id).await {
        Ok(message) => json_ok(message),
        Err(e) => error_response(&e),
    }
}

pub async fn get_message_associations(state: Arc<AppState>, id: &str) -> Response<Full<Bytes>> {
    match state.association.get_by_target(id).await {
        Ok(associations) => json_ok(associations),
        Err(e) => error_response(&e),
    }
}

pub async fn get_association(state: Arc<AppState>, id: &str) -> Response<Full<Bytes>> {
    match state.association.get(id).await {
        Ok(association) => json_ok(association),
        Err(e) => error_response(&e),
    }
}

pub async fn get_profile(state: Arc<AppState>, id: &str) -> Response<Full<Bytes>> {
    match state.profile.get(id).await {
        Ok(profile) => json_ok(profile),
        Err(e) => error_response(&e),
    }
}

pub async fn list_profiles(state: Arc<AppState>, query: &str) -> Response<Full<Bytes>> {
    let params = super::parse_query(query);

    if let (Some(semantic_id), Some(owner)) = (params.get("semanticid"), params.get("owner")) {
        return match state.profile.get_by_semantic_id(semantic_id, owner).await {
            Ok(profile) => json_ok(vec![profile]),
            Err(e) => error_response(&e),
        };
    }

    let result = match (params.get("author"), params.get("schema")) {
        (Some(author), Some(schema)) => {
            state.profile.get_by_author_and_schema(author, schema).await
        }
        (Some(author), None) => state.profile.get_by_author(author).await,
        _ => {
            return error_response(&ConcrntError::InvalidInput(
                "author or semanticid+owner parameter is required".into(),
            ))
        }
    };

    match result {
        Ok(profiles) => json_ok(profiles),
        Err(e) => error_response(&e),
    }
}

pub async fn get_acker(state: Arc<AppState>, id: &str) -> Response<Full<Bytes>> {
    match state.ack.get_acker(id).await {
        Ok(acks) => json_ok(acks),
        Err(e) => error_response(&e),
    }
}

pub async fn get_acking(state: Arc<AppState>, id: &str) -> Response<Full<Bytes>> {
    match state.ack.get_acking(id).await {
        Ok(acks) => json_ok(acks),
        Err(e) => error_response(&e),
    }
}

pub async fn get_subscription(state: Arc<AppState>, id: &str) -> Response<Full<Bytes>> {
    match state.subscription.get_subscription(id).await {
        Ok(subscription) => json_ok(subscription),
        Err(e) => error_response(&e),
    }
}
