//! Semantic id registry
//!
//! A semantic id is a human-chosen label in an entity's namespace that
//! resolves to a CDID. Unique on `(id, owner)`; re-naming the same label to
//! a different target is refused so a stale alias can never be hijacked
//! silently - the owner deletes first.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::{IntoIndexes, MongoClient, MongoCollection};
use crate::types::{ConcrntError, Result};

pub const SEMANTICID_COLLECTION: &str = "semanticids";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticIdRecord {
    pub id: String,
    pub owner: String,
    pub target: String,
    pub document: String,
    pub signature: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub cdate: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub mdate: DateTime<Utc>,
}

impl IntoIndexes for SemanticIdRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "id": 1, "owner": 1 },
            Some(IndexOptions::builder().unique(true).build()),
        )]
    }
}

#[derive(Clone)]
pub struct SemanticIdService {
    collection: MongoCollection<SemanticIdRecord>,
}

impl SemanticIdService {
    pub async fn new(db: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: db.collection(SEMANTICID_COLLECTION).await?,
        })
    }

    /// Resolve `(id, owner)` to its target CDID.
    pub async fn lookup(&self, id: &str, owner: &str) -> Result<String> {
        self.collection
            .find_one(doc! { "id": id, "owner": owner })
            .await?
            .map(|r| r.target)
            .ok_or_else(|| ConcrntError::NotFound(format!("semantic id {id}@{owner}")))
    }

    /// Bind `(id, owner)` to `target`. Idempotent on the same target.
    pub async fn name(
        &self,
        id: &str,
        owner: &str,
        target: &str,
        document: &str,
        signature: &str,
    ) -> Result<String> {
        if let Some(existing) = self
            .collection
            .find_one(doc! { "id": id, "owner": owner })
            .await?
        {
            if existing.target != target {
                return Err(ConcrntError::AlreadyExists(format!(
                    "semantic id {id}@{owner} already points to {}",
                    existing.target
                )));
            }
            return Ok(existing.target);
        }

        let record = SemanticIdRecord {
            id: id.to_string(),
            owner: owner.to_string(),
            target: target.to_string(),
            document: document.to_string(),
            signature: signature.to_string(),
            cdate: Utc::now(),
            mdate: Utc::now(),
        };
        self.collection.insert_one(&record).await?;
        Ok(record.target)
    }

    pub async fn delete(&self, id: &str, owner: &str) -> Result<()> {
        self.collection
            .delete_one(doc! { "id": id, "owner": owner })
            .await?;
        Ok(())
    }

    /// Remove every binding an entity owns.
    pub async fn clean(&self, owner: &str) -> Result<()> {
        self.collection.delete_many(doc! { "owner": owner }).await?;
        Ok(())
    }
}
