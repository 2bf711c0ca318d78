use chrono::Utc;

use crate::client::ApiClient;
use crate::config::Args;
use crate::crypto;
use crate::model::Domain;
use crate::types::{ConcrntError, Result};

use super::repository::DomainRepository;

/// FQDN registry with cross-dimension rejection. Remote domains are pulled
/// on first reference and refused when their dimension differs from ours.
#[derive(Clone)]
pub struct DomainService {
    repository: DomainRepository,
    client: ApiClient,
    config: Args,
}

impl DomainService {
    pub fn new(repository: DomainRepository, client: ApiClient, config: Args) -> Self {
        Self {
            repository,
            client,
            config,
        }
    }

    /// The record this server publishes about itself.
    pub fn self_domain(&self) -> Domain {
        Domain {
            id: self.config.fqdn.clone(),
            ccid: self.config.ccid.clone(),
            csid: self.config.csid.clone(),
            dimension: self.config.dimension.clone(),
            cdate: Utc::now(),
            mdate: Utc::now(),
            ..Default::default()
        }
    }

    /// Resolve a domain by FQDN, CCID or CSID.
    pub async fn get(&self, id: &str) -> Result<Domain> {
        if crypto::is_ccid(id) {
            return self.repository.get_by_ccid(id).await;
        }
        if crypto::is_csid(id) {
            if id == self.config.csid {
                return Ok(self.self_domain());
            }
            return self.repository.get_by_csid(id).await;
        }
        if id == self.config.fqdn {
            return Ok(self.self_domain());
        }
        self.repository.get_by_fqdn(id).await
    }

    /// Resolve by FQDN, pulling the record from the peer on a local miss.
    pub async fn get_by_fqdn(&self, fqdn: &str) -> Result<Domain> {
        if fqdn == self.config.fqdn {
            return Ok(self.self_domain());
        }
        if let Ok(domain) = self.repository.get_by_fqdn(fqdn).await {
            return Ok(domain);
        }
        self.fetch_and_register(fqdn).await
    }

    /// Refresh a peer record unconditionally.
    pub async fn force_fetch(&self, fqdn: &str) -> Result<Domain> {
        self.fetch_and_register(fqdn).await
    }

    async fn fetch_and_register(&self, fqdn: &str) -> Result<Domain> {
        let domain = self.client.get_domain(fqdn).await?;
        if domain.dimension != self.config.dimension {
            return Err(ConcrntError::InvalidInput(format!(
                "domain {fqdn} is not in dimension {}",
                self.config.dimension
            )));
        }
        self.repository.upsert(domain).await
    }

    pub async fn upsert(&self, domain: Domain) -> Result<Domain> {
        self.repository.upsert(domain).await
    }

    pub async fn list(&self) -> Result<Vec<Domain>> {
        self.repository.list().await
    }

    pub async fn delete(&self, fqdn: &str) -> Result<()> {
        self.repository.delete(fqdn).await
    }

    pub async fn update_score(&self, fqdn: &str, score: i32) -> Result<()> {
        self.repository.update_score(fqdn, score).await
    }
}
