//! Policy resolution and evaluation service

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use chunk_cache_core::CacheStore;

use crate::model::RequestContext;
use crate::types::Result;

use super::engine::{self, Policy, PolicyEvalResult};

const POLICY_CACHE_PREFIX: &str = "policy:body:";
const POLICY_CACHE_TTL: Duration = Duration::from_secs(300);

/// Domain-wide fallback policy. Per-action defaults decide anything no
/// statement claims; the statements grant resource owners their own
/// update/delete/retract rights.
const GLOBAL_POLICY_JSON: &str = r#"{
    "statements": {
        "timeline.update": {
            "condition": {"op": "Eq", "args": [
                {"op": "LoadSelf", "const": "author"},
                {"op": "LoadRequester", "const": "ccid"}
            ]}
        },
        "timeline.delete": {
            "condition": {"op": "Eq", "args": [
                {"op": "LoadSelf", "const": "author"},
                {"op": "LoadRequester", "const": "ccid"}
            ]}
        },
        "timeline.retract": {
            "condition": {"op": "Or", "args": [
                {"op": "Eq", "args": [
                    {"op": "LoadSelf", "const": "author"},
                    {"op": "LoadRequester", "const": "ccid"}
                ]},
                {"op": "Eq", "args": [
                    {"op": "LoadResource", "const": "owner"},
                    {"op": "LoadRequester", "const": "ccid"}
                ]}
            ]}
        },
        "message.delete": {
            "condition": {"op": "Eq", "args": [
                {"op": "LoadSelf", "const": "author"},
                {"op": "LoadRequester", "const": "ccid"}
            ]}
        }
    },
    "defaults": {
        "timeline.create": true,
        "timeline.distribute": true,
        "timeline.update": false,
        "timeline.delete": false,
        "timeline.retract": false,
        "message.create": true,
        "message.delete": false,
        "association.attach": true,
        "association.delete": false,
        "profile.update": true,
        "subscription.create": true,
        "invite": true
    }
}"#;

#[derive(Clone)]
pub struct PolicyService {
    http: reqwest::Client,
    cache: Arc<CacheStore>,
    global: Arc<Policy>,
}

impl PolicyService {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        let global: Policy =
            serde_json::from_str(GLOBAL_POLICY_JSON).expect("global policy is well-formed");
        Self {
            http: reqwest::Client::new(),
            cache,
            global: Arc::new(global),
        }
    }

    /// Evaluate `action` under the policy at `policy_url`. An empty URL,
    /// a fetch failure or a parse failure all yield `Default` - resources
    /// without a reachable policy fall back to the global defaults.
    pub async fn test_with_policy_url(
        &self,
        policy_url: &str,
        ctx: &RequestContext,
        action: &str,
    ) -> PolicyEvalResult {
        if policy_url.is_empty() {
            return PolicyEvalResult::Default;
        }

        match self.fetch_policy(policy_url).await {
            Ok(policy) => policy.test(ctx, action),
            Err(e) => {
                warn!(url = policy_url, error = %e, "policy fetch failed, defaulting");
                PolicyEvalResult::Default
            }
        }
    }

    /// Evaluate `action` under the domain-wide global policy.
    pub fn test_with_global_policy(&self, ctx: &RequestContext, action: &str) -> PolicyEvalResult {
        self.global.test(ctx, action)
    }

    /// Reduce per-resource results with the global defaults as fallback.
    pub fn summarize(&self, results: &[PolicyEvalResult], action: &str) -> bool {
        engine::summarize(results, action, &self.global.defaults)
    }

    async fn fetch_policy(&self, url: &str) -> Result<Policy> {
        let cache_key = format!("{POLICY_CACHE_PREFIX}{url}");
        if let Some(hit) = self.cache.get(&cache_key) {
            if let Ok(policy) = serde_json::from_slice(&hit) {
                return Ok(policy);
            }
        }

        let body = self.http.get(url).send().await?.bytes().await?;
        let policy: Policy = serde_json::from_slice(&body)?;
        self.cache.set_with_ttl(&cache_key, body.to_vec(), POLICY_CACHE_TTL);
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use serde_json::json;

    fn service() -> PolicyService {
        PolicyService::new(Arc::new(CacheStore::new()))
    }

    fn requester(id: &str) -> RequestContext {
        RequestContext {
            requester: Some(Entity {
                id: id.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn global_policy_grants_author_update() {
        let svc = service();
        let mut ctx = requester("con1me");
        ctx.self_resource = Some(json!({"author": "con1me"}));
        assert_eq!(
            svc.test_with_global_policy(&ctx, "timeline.update"),
            PolicyEvalResult::Allow
        );

        ctx.self_resource = Some(json!({"author": "con1other"}));
        assert_eq!(
            svc.test_with_global_policy(&ctx, "timeline.update"),
            PolicyEvalResult::Deny
        );
    }

    #[test]
    fn summarize_falls_back_to_action_default() {
        let svc = service();
        assert!(svc.summarize(&[PolicyEvalResult::Default], "timeline.distribute"));
        assert!(!svc.summarize(&[PolicyEvalResult::Default], "timeline.update"));
        assert!(svc.summarize(&[PolicyEvalResult::Default], "invite"));
    }

    #[test]
    fn retract_allows_item_owner() {
        let svc = service();
        let mut ctx = requester("con1owner");
        ctx.self_resource = Some(json!({"author": "con1other"}));
        ctx.resource = Some(json!({"owner": "con1owner"}));
        assert_eq!(
            svc.test_with_global_policy(&ctx, "timeline.retract"),
            PolicyEvalResult::Allow
        );
    }

    #[tokio::test]
    async fn empty_policy_url_defaults() {
        let svc = service();
        let result = svc
            .test_with_policy_url("", &RequestContext::default(), "timeline.distribute")
            .await;
        assert_eq!(result, PolicyEvalResult::Default);
    }
}
