//! Outbound peer RPC
//!
//! Thin HTTPS client for the peer-facing API of other domains. Every call
//! maps transport or decode failures to `Upstream` so fan-out paths can log
//! and skip a slow peer without failing the caller's request.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::model::{Chunk, Domain, Entity, ResponseBase, Timeline};
use crate::types::{ConcrntError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    user_agent: String,
}

impl ApiClient {
    pub fn new(fqdn: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            user_agent: format!("concrnt ({fqdn})"),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .header("user-agent", &self.user_agent)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConcrntError::Upstream(format!("{url}: http {status}")));
        }

        let body: ResponseBase<T> = response.json().await?;
        body.content
            .ok_or_else(|| ConcrntError::Upstream(format!("{url}: empty response")))
    }

    pub async fn get_entity(&self, domain: &str, ccid: &str) -> Result<Entity> {
        self.get_json(&format!("https://{domain}/api/v1/entity/{ccid}"))
            .await
    }

    pub async fn get_domain(&self, fqdn: &str) -> Result<Domain> {
        self.get_json(&format!("https://{fqdn}/api/v1/domain")).await
    }

    pub async fn get_timeline(&self, domain: &str, id: &str) -> Result<Timeline> {
        self.get_json(&format!("https://{domain}/api/v1/timeline/{id}"))
            .await
    }

    /// Peer chunk-iterator RPC: which epoch actually holds the body for
    /// each timeline at `epoch`.
    pub async fn get_chunk_itrs(
        &self,
        domain: &str,
        timelines: &[String],
        epoch: &str,
    ) -> Result<HashMap<String, String>> {
        let url = format!(
            "https://{domain}/api/v1/chunks/itrs?timelines={}&epoch={}",
            timelines.join(","),
            epoch
        );
        self.get_json(&url).await
    }

    /// Peer chunk-body RPC. `query` maps timeline id to the epoch to load;
    /// the two lists travel as paired CSVs.
    pub async fn get_chunk_bodies(
        &self,
        domain: &str,
        query: &HashMap<String, String>,
    ) -> Result<HashMap<String, Chunk>> {
        let mut timelines = Vec::with_capacity(query.len());
        let mut epochs = Vec::with_capacity(query.len());
        for (timeline, epoch) in query {
            timelines.push(timeline.clone());
            epochs.push(epoch.clone());
        }
        let url = format!(
            "https://{domain}/api/v1/chunks/bodies?timelines={}&epochs={}",
            timelines.join(","),
            epochs.join(",")
        );
        self.get_json(&url).await
    }

}
