//! Schema registry - URL to small-int interning
//!
//! Stored fields carry a compact integer instead of the full schema URL.
//! Interning is permanent: an id is never reassigned, so both directions
//! cache forever and a hit never needs revalidation.

use bson::{doc, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use chunk_cache_core::CacheStore;

use crate::db::{IntoIndexes, MongoClient, MongoCollection};
use crate::types::{ConcrntError, Result};

pub const SCHEMA_COLLECTION: &str = "schemas";
const COUNTER_COLLECTION: &str = "counters";
const COUNTER_ID: &str = "schemas";

const URL_CACHE_PREFIX: &str = "schema:url:";
const ID_CACHE_PREFIX: &str = "schema:id:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: i32,
    pub url: String,
}

impl IntoIndexes for SchemaRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "url": 1 },
                Some(IndexOptions::builder().unique(true).build()),
            ),
            (
                doc! { "id": 1 },
                Some(IndexOptions::builder().unique(true).build()),
            ),
        ]
    }
}

#[derive(Clone)]
pub struct SchemaService {
    collection: MongoCollection<SchemaRecord>,
    counters: mongodb::Collection<Document>,
    cache: Arc<CacheStore>,
}

impl SchemaService {
    pub async fn new(db: &MongoClient, cache: Arc<CacheStore>) -> Result<Self> {
        Ok(Self {
            collection: db.collection(SCHEMA_COLLECTION).await?,
            counters: db.raw_collection(COUNTER_COLLECTION),
            cache,
        })
    }

    /// Intern a schema URL to its id, allocating one on first sight.
    pub async fn url_to_id(&self, url: &str) -> Result<i32> {
        if url.is_empty() {
            return Err(ConcrntError::InvalidInput("empty schema url".into()));
        }

        let cache_key = format!("{URL_CACHE_PREFIX}{url}");
        if let Some(hit) = self.cache.get(&cache_key) {
            if let Ok(id) = String::from_utf8_lossy(&hit).parse() {
                return Ok(id);
            }
        }

        if let Some(found) = self.collection.find_one(doc! { "url": url }).await? {
            self.remember(&found);
            return Ok(found.id);
        }

        let id = self.next_id().await?;
        let record = SchemaRecord {
            id,
            url: url.to_string(),
        };
        match self.collection.insert_one(&record).await {
            Ok(()) => {
                self.remember(&record);
                Ok(id)
            }
            // lost an interning race; the winner's row is authoritative
            Err(ConcrntError::AlreadyExists(_)) => {
                let found = self
                    .collection
                    .find_one(doc! { "url": url })
                    .await?
                    .ok_or_else(|| ConcrntError::Database("schema row vanished".into()))?;
                self.remember(&found);
                Ok(found.id)
            }
            Err(e) => Err(e),
        }
    }

    /// Reverse lookup.
    pub async fn id_to_url(&self, id: i32) -> Result<String> {
        let cache_key = format!("{ID_CACHE_PREFIX}{id}");
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(String::from_utf8_lossy(&hit).into_owned());
        }

        let found = self
            .collection
            .find_one(doc! { "id": id })
            .await?
            .ok_or_else(|| ConcrntError::NotFound(format!("schema id {id}")))?;
        self.remember(&found);
        Ok(found.url)
    }

    fn remember(&self, record: &SchemaRecord) {
        self.cache.set(
            &format!("{URL_CACHE_PREFIX}{}", record.url),
            record.id.to_string(),
        );
        self.cache
            .set(&format!("{ID_CACHE_PREFIX}{}", record.id), record.url.clone());
    }

    async fn next_id(&self) -> Result<i32> {
        let counter = self
            .counters
            .find_one_and_update(
                doc! { "_id": COUNTER_ID },
                doc! { "$inc": { "seq": 1 } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| ConcrntError::Database(format!("counter update: {e}")))?
            .ok_or_else(|| ConcrntError::Database("counter missing after upsert".into()))?;
        Ok(counter.get_i32("seq").unwrap_or_else(|_| {
            counter.get_i64("seq").map(|v| v as i32).unwrap_or_default()
        }))
    }
}
