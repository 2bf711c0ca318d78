use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::{IntoIndexes, MongoClient, MongoCollection};
use crate::model::Domain;
use crate::types::{ConcrntError, Result};

pub const DOMAIN_COLLECTION: &str = "domains";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRecord {
    /// FQDN
    pub _id: String,
    pub ccid: String,
    pub csid: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub score: i32,
    pub dimension: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub cdate: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub mdate: DateTime<Utc>,
}

impl IntoIndexes for DomainRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (doc! { "ccid": 1 }, None),
            (doc! { "csid": 1 }, None),
        ]
    }
}

impl From<DomainRecord> for Domain {
    fn from(r: DomainRecord) -> Self {
        Domain {
            id: r._id,
            ccid: r.ccid,
            csid: r.csid,
            tag: r.tag,
            score: r.score,
            dimension: r.dimension,
            cdate: r.cdate,
            mdate: r.mdate,
        }
    }
}

#[derive(Clone)]
pub struct DomainRepository {
    collection: MongoCollection<DomainRecord>,
}

impl DomainRepository {
    pub async fn new(db: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: db.collection(DOMAIN_COLLECTION).await?,
        })
    }

    pub async fn get_by_fqdn(&self, fqdn: &str) -> Result<Domain> {
        self.collection
            .find_one(doc! { "_id": fqdn })
            .await?
            .map(Domain::from)
            .ok_or_else(|| ConcrntError::NotFound(format!("domain {fqdn}")))
    }

    pub async fn get_by_ccid(&self, ccid: &str) -> Result<Domain> {
        self.collection
            .find_one(doc! { "ccid": ccid })
            .await?
            .map(Domain::from)
            .ok_or_else(|| ConcrntError::NotFound(format!("domain with ccid {ccid}")))
    }

    pub async fn get_by_csid(&self, csid: &str) -> Result<Domain> {
        self.collection
            .find_one(doc! { "csid": csid })
            .await?
            .map(Domain::from)
            .ok_or_else(|| ConcrntError::NotFound(format!("domain with csid {csid}")))
    }

    pub async fn upsert(&self, domain: Domain) -> Result<Domain> {
        let existing = self.collection.find_one(doc! { "_id": &domain.id }).await?;
        let record = DomainRecord {
            _id: domain.id.clone(),
            ccid: domain.ccid.clone(),
            csid: domain.csid.clone(),
            tag: domain.tag.clone(),
            score: domain.score,
            dimension: domain.dimension.clone(),
            cdate: existing.map(|e| e.cdate).unwrap_or_else(Utc::now),
            mdate: Utc::now(),
        };
        self.collection
            .upsert(doc! { "_id": &record._id }, &record)
            .await?;
        Ok(record.into())
    }

    pub async fn list(&self) -> Result<Vec<Domain>> {
        let records = self.collection.find_many(doc! {}, None, None).await?;
        Ok(records.into_iter().map(Domain::from).collect())
    }

    pub async fn delete(&self, fqdn: &str) -> Result<()> {
        if !self.collection.delete_one(doc! { "_id": fqdn }).await? {
            return Err(ConcrntError::NotFound(format!("domain {fqdn}")));
        }
        Ok(())
    }

    pub async fn update_score(&self, fqdn: &str, score: i32) -> Result<()> {
        self.collection
            .update_one(doc! { "_id": fqdn }, doc! { "$set": { "score": score } })
            .await?;
        Ok(())
    }
}
