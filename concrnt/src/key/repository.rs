use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::{IntoIndexes, MongoClient, MongoCollection};
use crate::model::Key;
use crate::types::{ConcrntError, Result};

pub const KEY_COLLECTION: &str = "keys";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    /// CKID
    pub _id: String,
    pub root: String,
    pub parent: String,
    pub enact_document: String,
    pub enact_signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_signature: Option<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub valid_since: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::db::optional_bson_datetime"
    )]
    pub valid_until: Option<DateTime<Utc>>,
}

impl IntoIndexes for KeyRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(doc! { "root": 1 }, None)]
    }
}

impl From<KeyRecord> for Key {
    fn from(r: KeyRecord) -> Self {
        Key {
            id: r._id,
            root: r.root,
            parent: r.parent,
            enact_document: r.enact_document,
            enact_signature: r.enact_signature,
            revoke_document: r.revoke_document,
            revoke_signature: r.revoke_signature,
            valid_since: r.valid_since,
            valid_until: r.valid_until,
        }
    }
}

impl From<Key> for KeyRecord {
    fn from(k: Key) -> Self {
        KeyRecord {
            _id: k.id,
            root: k.root,
            parent: k.parent,
            enact_document: k.enact_document,
            enact_signature: k.enact_signature,
            revoke_document: k.revoke_document,
            revoke_signature: k.revoke_signature,
            valid_since: k.valid_since,
            valid_until: k.valid_until,
        }
    }
}

#[derive(Clone)]
pub struct KeyRepository {
    collection: MongoCollection<KeyRecord>,
}

impl KeyRepository {
    pub async fn new(db: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: db.collection(KEY_COLLECTION).await?,
        })
    }

    pub async fn get(&self, ckid: &str) -> Result<Key> {
        self.collection
            .find_one(doc! { "_id": ckid })
            .await?
            .map(Key::from)
            .ok_or_else(|| ConcrntError::NotFound(format!("key {ckid}")))
    }

    pub async fn enact(&self, key: Key) -> Result<Key> {
        let record = KeyRecord::from(key);
        self.collection.insert_one(&record).await?;
        Ok(record.into())
    }

    pub async fn revoke(
        &self,
        ckid: &str,
        document: &str,
        signature: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<Key> {
        let modified = self
            .collection
            .update_one(
                doc! { "_id": ckid },
                doc! { "$set": {
                    "revoke_document": document,
                    "revoke_signature": signature,
                    "valid_until": bson::DateTime::from_chrono(valid_until),
                } },
            )
            .await?;
        if modified == 0 {
            return Err(ConcrntError::NotFound(format!("key {ckid}")));
        }
        self.get(ckid).await
    }

    pub async fn get_all_by_root(&self, root: &str) -> Result<Vec<Key>> {
        let records = self
            .collection
            .find_many(doc! { "root": root }, None, None)
            .await?;
        Ok(records.into_iter().map(Key::from).collect())
    }

    pub async fn clean(&self, root: &str) -> Result<()> {
        self.collection.delete_many(doc! { "root": root }).await?;
        Ok(())
    }
}
