//! The write endpoint

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::sync::Arc;
use tracing::debug;

use crate::model::Commit;
use crate::server::AppState;
use crate::types::ConcrntError;

use super::{error_response, json_ok};

pub async fn handle_commit(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let principal = match state.auth.identify(req.headers()).await {
        Ok(principal) => principal,
        Err(e) => return error_response(&e),
    };

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return error_response(&ConcrntError::InvalidInput(format!(
                "failed to read body: {e}"
            )))
        }
    };

    let commit: Commit = match serde_json::from_slice(&body) {
        Ok(commit) => commit,
        Err(e) => return error_response(&ConcrntError::from(e)),
    };

    debug!(requester = principal.requester_id.as_str(), "commit received");

    match state
        .store
        .commit(
            &commit.document,
            &commit.signature,
            commit.option.as_deref(),
            &principal,
        )
        .await
    {
        Ok(content) => json_ok(content),
        Err(e) => error_response(&e),
    }
}
