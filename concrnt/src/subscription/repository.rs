use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::{IntoIndexes, MongoClient, MongoCollection};
use crate::model::{Subscription, SubscriptionItem};
use crate::schema::SchemaService;
use crate::types::{ConcrntError, Result};

pub const SUBSCRIPTION_COLLECTION: &str = "subscriptions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionItemRecord {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// 26-character CDID, stored without the `s` prefix
    pub _id: String,
    pub author: String,
    #[serde(default)]
    pub indexable: bool,
    #[serde(default)]
    pub domain_owned: bool,
    pub schema_id: i32,
    #[serde(default)]
    pub policy_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_params: Option<String>,
    pub document: String,
    pub signature: String,
    #[serde(default)]
    pub items: Vec<SubscriptionItemRecord>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub cdate: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub mdate: DateTime<Utc>,
}

impl IntoIndexes for SubscriptionRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(doc! { "author": 1 }, None)]
    }
}

#[derive(Clone)]
pub struct SubscriptionRepository {
    collection: MongoCollection<SubscriptionRecord>,
    schema: SchemaService,
}

impl SubscriptionRepository {
    pub async fn new(db: &MongoClient, schema: SchemaService) -> Result<Self> {
        Ok(Self {
            collection: db.collection(SUBSCRIPTION_COLLECTION).await?,
            schema,
        })
    }

    fn normalize_id(id: &str) -> Result<String> {
        let bare = if id.len() == 27 {
            id.strip_prefix('s').ok_or_else(|| {
                ConcrntError::InvalidInput(format!(
                    "subscription typed id must start with 's': {id}"
                ))
            })?
        } else {
            id
        };
        if bare.len() != 26 {
            return Err(ConcrntError::InvalidInput(format!(
                "subscription id must be 26 characters: {id}"
            )));
        }
        Ok(bare.to_string())
    }

    pub async fn get(&self, id: &str) -> Result<Subscription> {
        let bare = Self::normalize_id(id)?;
        let record = self
            .collection
            .find_one(doc! { "_id": bare })
            .await?
            .ok_or_else(|| ConcrntError::NotFound(format!("subscription {id}")))?;
        self.to_model(record).await
    }

    pub async fn upsert(&self, subscription: Subscription) -> Result<Subscription> {
        let bare = Self::normalize_id(&subscription.id)?;
        let schema_id = self.schema.url_to_id(&subscription.schema).await?;
        let policy_id = if subscription.policy.is_empty() {
            0
        } else {
            self.schema.url_to_id(&subscription.policy).await?
        };

        let existing = self.collection.find_one(doc! { "_id": &bare }).await?;

        let record = SubscriptionRecord {
            _id: bare.clone(),
            author: subscription.author.clone(),
            indexable: subscription.indexable,
            domain_owned: subscription.domain_owned,
            schema_id,
            policy_id,
            policy_params: subscription.policy_params.clone(),
            document: subscription.document.clone(),
            signature: subscription.signature.clone(),
            items: existing
                .as_ref()
                .map(|e| e.items.clone())
                .unwrap_or_default(),
            cdate: existing.map(|e| e.cdate).unwrap_or_else(Utc::now),
            mdate: Utc::now(),
        };
        self.collection.upsert(doc! { "_id": &bare }, &record).await?;
        self.to_model(record).await
    }

    pub async fn add_item(&self, subscription_id: &str, target: &str) -> Result<()> {
        let bare = Self::normalize_id(subscription_id)?;
        self.collection
            .update_one(
                doc! { "_id": bare },
                doc! { "$addToSet": { "items": { "id": target } } },
            )
            .await?;
        Ok(())
    }

    pub async fn remove_item(&self, subscription_id: &str, target: &str) -> Result<()> {
        let bare = Self::normalize_id(subscription_id)?;
        self.collection
            .update_one(
                doc! { "_id": bare },
                doc! { "$pull": { "items": { "id": target } } },
            )
            .await?;
        Ok(())
    }

    pub async fn get_by_author(&self, author: &str) -> Result<Vec<Subscription>> {
        let records = self
            .collection
            .find_many(doc! { "author": author }, None, None)
            .await?;
        let mut subscriptions = Vec::with_capacity(records.len());
        for record in records {
            subscriptions.push(self.to_model(record).await?);
        }
        Ok(subscriptions)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let bare = Self::normalize_id(id)?;
        if !self.collection.delete_one(doc! { "_id": bare }).await? {
            return Err(ConcrntError::NotFound(format!("subscription {id}")));
        }
        Ok(())
    }

    pub async fn clean(&self, author: &str) -> Result<()> {
        self.collection.delete_many(doc! { "author": author }).await?;
        Ok(())
    }

    async fn to_model(&self, record: SubscriptionRecord) -> Result<Subscription> {
        let schema = self.schema.id_to_url(record.schema_id).await?;
        let policy = if record.policy_id == 0 {
            String::new()
        } else {
            self.schema.id_to_url(record.policy_id).await?
        };
        let id = format!("s{}", record._id);
        Ok(Subscription {
            items: record
                .items
                .into_iter()
                .map(|i| SubscriptionItem {
                    id: i.id,
                    subscription: id.clone(),
                })
                .collect(),
            id,
            author: record.author,
            indexable: record.indexable,
            domain_owned: record.domain_owned,
            schema,
            policy,
            policy_params: record.policy_params,
            document: record.document,
            signature: record.signature,
            cdate: record.cdate,
            mdate: record.mdate,
        })
    }
}
