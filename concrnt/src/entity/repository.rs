use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use chunk_cache_core::CacheStore;

use crate::db::{IntoIndexes, MongoClient, MongoCollection};
use crate::model::{Entity, EntityMeta};
use crate::types::{ConcrntError, Result};

pub const ENTITY_COLLECTION: &str = "entities";
pub const ENTITY_META_COLLECTION: &str = "entity_meta";

const COUNT_CACHE_KEY: &str = "entity_count";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    /// CCID
    pub _id: String,
    pub domain: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub is_score_fixed: bool,
    pub affiliation_document: String,
    pub affiliation_signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tombstone_document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tombstone_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub cdate: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub mdate: DateTime<Utc>,
}

impl IntoIndexes for EntityRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "alias": 1 },
                Some(IndexOptions::builder().sparse(true).build()),
            ),
            (doc! { "domain": 1 }, None),
        ]
    }
}

impl From<EntityRecord> for Entity {
    fn from(r: EntityRecord) -> Self {
        Entity {
            id: r._id,
            domain: r.domain,
            tag: r.tag,
            score: r.score,
            is_score_fixed: r.is_score_fixed,
            affiliation_document: r.affiliation_document,
            affiliation_signature: r.affiliation_signature,
            tombstone_document: r.tombstone_document,
            tombstone_signature: r.tombstone_signature,
            alias: r.alias,
            cdate: r.cdate,
            mdate: r.mdate,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityMetaRecord {
    /// CCID
    pub _id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inviter: Option<String>,
}

impl IntoIndexes for EntityMetaRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![]
    }
}

#[derive(Clone)]
pub struct EntityRepository {
    collection: MongoCollection<EntityRecord>,
    meta: MongoCollection<EntityMetaRecord>,
    cache: Arc<CacheStore>,
}

impl EntityRepository {
    pub async fn new(db: &MongoClient, cache: Arc<CacheStore>) -> Result<Self> {
        let repo = Self {
            collection: db.collection(ENTITY_COLLECTION).await?,
            meta: db.collection(ENTITY_META_COLLECTION).await?,
            cache,
        };
        // seed the counter so the fast path works from the first request
        match repo.collection.count(doc! {}).await {
            Ok(count) => repo.cache.set(COUNT_CACHE_KEY, count.to_string()),
            Err(e) => warn!(error = %e, "failed to seed entity counter"),
        }
        Ok(repo)
    }

    pub async fn get(&self, ccid: &str) -> Result<Entity> {
        self.collection
            .find_one(doc! { "_id": ccid })
            .await?
            .map(Entity::from)
            .ok_or_else(|| ConcrntError::NotFound(format!("entity {ccid}")))
    }

    pub async fn get_by_alias(&self, alias: &str) -> Result<Entity> {
        self.collection
            .find_one(doc! { "alias": alias })
            .await?
            .map(Entity::from)
            .ok_or_else(|| ConcrntError::NotFound(format!("entity alias {alias}")))
    }

    pub async fn set_alias(&self, ccid: &str, alias: &str) -> Result<()> {
        self.collection
            .update_one(doc! { "_id": ccid }, doc! { "$set": { "alias": alias } })
            .await?;
        Ok(())
    }

    pub async fn upsert(&self, entity: Entity) -> Result<Entity> {
        let existing = self.collection.find_one(doc! { "_id": &entity.id }).await?;
        let is_new = existing.is_none();
        let record = EntityRecord {
            _id: entity.id.clone(),
            domain: entity.domain.clone(),
            tag: entity.tag.clone(),
            score: entity.score,
            is_score_fixed: entity.is_score_fixed,
            affiliation_document: entity.affiliation_document.clone(),
            affiliation_signature: entity.affiliation_signature.clone(),
            tombstone_document: entity.tombstone_document.clone(),
            tombstone_signature: entity.tombstone_signature.clone(),
            alias: entity
                .alias
                .clone()
                .or_else(|| existing.as_ref().and_then(|e| e.alias.clone())),
            cdate: existing.map(|e| e.cdate).unwrap_or_else(Utc::now),
            mdate: Utc::now(),
        };
        self.collection
            .upsert(doc! { "_id": &record._id }, &record)
            .await?;
        if is_new {
            self.bump_count(1);
        }
        Ok(record.into())
    }

    pub async fn upsert_with_meta(
        &self,
        entity: Entity,
        meta: EntityMeta,
    ) -> Result<(Entity, EntityMeta)> {
        let entity = self.upsert(entity).await?;
        let record = EntityMetaRecord {
            _id: meta.id.clone(),
            info: meta.info.clone(),
            inviter: meta.inviter.clone(),
        };
        self.meta.upsert(doc! { "_id": &record._id }, &record).await?;
        Ok((entity, meta))
    }

    pub async fn get_meta(&self, ccid: &str) -> Result<EntityMeta> {
        self.meta
            .find_one(doc! { "_id": ccid })
            .await?
            .map(|r| EntityMeta {
                id: r._id,
                info: r.info,
                inviter: r.inviter,
            })
            .ok_or_else(|| ConcrntError::NotFound(format!("entity meta {ccid}")))
    }

    pub async fn set_tombstone(&self, ccid: &str, document: &str, signature: &str) -> Result<()> {
        let modified = self
            .collection
            .update_one(
                doc! { "_id": ccid },
                doc! { "$set": {
                    "tombstone_document": document,
                    "tombstone_signature": signature,
                } },
            )
            .await?;
        if modified == 0 {
            return Err(ConcrntError::NotFound(format!("entity {ccid}")));
        }
        Ok(())
    }

    pub async fn update_score(&self, ccid: &str, score: i32) -> Result<()> {
        self.collection
            .update_one(doc! { "_id": ccid }, doc! { "$set": { "score": score } })
            .await?;
        Ok(())
    }

    pub async fn update_tag(&self, ccid: &str, tag: &str) -> Result<()> {
        self.collection
            .update_one(doc! { "_id": ccid }, doc! { "$set": { "tag": tag } })
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Entity>> {
        let records = self.collection.find_many(doc! {}, None, None).await?;
        Ok(records.into_iter().map(Entity::from).collect())
    }

    pub async fn delete(&self, ccid: &str) -> Result<()> {
        if self.collection.delete_one(doc! { "_id": ccid }).await? {
            self.bump_count(-1);
        }
        Ok(())
    }

    pub async fn delete_meta(&self, ccid: &str) -> Result<()> {
        self.meta.delete_one(doc! { "_id": ccid }).await?;
        Ok(())
    }

    /// Cached entity count, recovered with a full count on a cache miss.
    pub async fn count(&self) -> Result<i64> {
        if let Some(cached) = self.cache.get(COUNT_CACHE_KEY) {
            if let Ok(count) = String::from_utf8_lossy(&cached).parse() {
                return Ok(count);
            }
        }
        let count = self.collection.count(doc! {}).await?;
        self.cache.set(COUNT_CACHE_KEY, count.to_string());
        Ok(count)
    }

    fn bump_count(&self, delta: i64) {
        let missed = if delta >= 0 {
            self.cache.incr(COUNT_CACHE_KEY, delta as u64).is_none()
        } else {
            self.cache.decr(COUNT_CACHE_KEY, (-delta) as u64).is_none()
        };
        if missed {
            // counter lost; next count() recovers it from the database
            self.cache.delete(COUNT_CACHE_KEY);
        }
    }
}
