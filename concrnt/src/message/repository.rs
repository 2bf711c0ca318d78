use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use chunk_cache_core::CacheStore;

use crate::db::{IntoIndexes, MongoClient, MongoCollection};
use crate::model::Message;
use crate::schema::SchemaService;
use crate::types::{ConcrntError, Result};

pub const MESSAGE_COLLECTION: &str = "messages";

const COUNT_CACHE_KEY: &str = "message_count";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// 26-character CDID, stored without the `m` prefix
    pub _id: String,
    pub author: String,
    pub schema_id: i32,
    #[serde(default)]
    pub policy_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_params: Option<String>,
    pub document: String,
    pub signature: String,
    pub timelines: Vec<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub cdate: DateTime<Utc>,
}

impl IntoIndexes for MessageRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(doc! { "author": 1 }, None)]
    }
}

#[derive(Clone)]
pub struct MessageRepository {
    collection: MongoCollection<MessageRecord>,
    schema: SchemaService,
    cache: Arc<CacheStore>,
}

impl MessageRepository {
    pub async fn new(db: &MongoClient, schema: SchemaService, cache: Arc<CacheStore>) -> Result<Self> {
        let repo = Self {
            collection: db.collection(MESSAGE_COLLECTION).await?,
            schema,
            cache,
        };
        match repo.collection.count(doc! {}).await {
            Ok(count) => repo.cache.set(COUNT_CACHE_KEY, count.to_string()),
            Err(e) => warn!(error = %e, "failed to seed message counter"),
        }
        Ok(repo)
    }

    fn normalize_id(id: &str) -> Result<String> {
        let bare = if id.len() == 27 {
            id.strip_prefix('m').ok_or_else(|| {
                ConcrntError::InvalidInput(format!("message typed id must start with 'm': {id}"))
            })?
        } else {
            id
        };
        if bare.len() != 26 {
            return Err(ConcrntError::InvalidInput(format!(
                "message id must be 26 characters: {id}"
            )));
        }
        Ok(bare.to_string())
    }

    pub async fn create(&self, message: Message) -> Result<Message> {
        let bare = Self::normalize_id(&message.id)?;
        let schema_id = self.schema.url_to_id(&message.schema).await?;
        let policy_id = if message.policy.is_empty() {
            0
        } else {
            self.schema.url_to_id(&message.policy).await?
        };

        let record = MessageRecord {
            _id: bare,
            author: message.author.clone(),
            schema_id,
            policy_id,
            policy_params: message.policy_params.clone(),
            document: message.document.clone(),
            signature: message.signature.clone(),
            timelines: message.timelines.clone(),
            cdate: message.cdate,
        };
        self.collection.insert_one(&record).await?;
        if self.cache.incr(COUNT_CACHE_KEY, 1).is_none() {
            self.cache.delete(COUNT_CACHE_KEY);
        }
        self.to_model(record).await
    }

    pub async fn get(&self, id: &str) -> Result<Message> {
        let bare = Self::normalize_id(id)?;
        let record = self
            .collection
            .find_one(doc! { "_id": bare })
            .await?
            .ok_or_else(|| ConcrntError::NotFound(format!("message {id}")))?;
        self.to_model(record).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let bare = Self::normalize_id(id)?;
        if !self.collection.delete_one(doc! { "_id": bare }).await? {
            return Err(ConcrntError::NotFound(format!("message {id}")));
        }
        if self.cache.decr(COUNT_CACHE_KEY, 1).is_none() {
            self.cache.delete(COUNT_CACHE_KEY);
        }
        Ok(())
    }

    pub async fn clean(&self, author: &str) -> Result<u64> {
        let removed = self.collection.delete_many(doc! { "author": author }).await?;
        // bulk delete makes the counter stale; recover lazily
        self.cache.delete(COUNT_CACHE_KEY);
        Ok(removed)
    }

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

    async fn to_model(&self, record: MessageRecord) -> Result<Message> {
        let schema = self.schema.id_to_url(record.schema_id).await?;
        let policy = if record.policy_id == 0 {
            String::new()
        } else {
            self.schema.id_to_url(record.policy_id).await?
        };
        Ok(Message {
            id: format!("m{}", record._id),
            author: record.author,
            schema,
            policy,
            policy_params: record.policy_params,
            document: record.document,
            signature: record.signature,
            timelines: record.timelines,
            cdate: record.cdate,
        })
    }
}
