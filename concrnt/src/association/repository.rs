use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::{IntoIndexes, MongoClient, MongoCollection};
use crate::model::Association;
use crate::schema::SchemaService;
use crate::types::{ConcrntError, Result};

pub const ASSOCIATION_COLLECTION: &str = "associations";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationRecord {
    /// 26-character CDID, stored without the `a` prefix
    pub _id: String,
    pub author: String,
    pub owner: String,
    pub schema_id: i32,
    pub variant: String,
    /// Typed id of the resource this association attaches to
    pub target: String,
    pub document: String,
    pub signature: String,
    #[serde(default)]
    pub timelines: Vec<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub cdate: DateTime<Utc>,
}

impl IntoIndexes for AssociationRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (doc! { "target": 1 }, None),
            (doc! { "author": 1, "target": 1 }, None),
        ]
    }
}

#[derive(Clone)]
pub struct AssociationRepository {
    collection: MongoCollection<AssociationRecord>,
    schema: SchemaService,
}

impl AssociationRepository {
    pub async fn new(db: &MongoClient, schema: SchemaService) -> Result<Self> {
        Ok(Self {
            collection: db.collection(ASSOCIATION_COLLECTION).await?,
            schema,
        })
    }

    fn normalize_id(id: &str) -> Result<String> {
        let bare = if id.len() == 27 {
            id.strip_prefix('a').ok_or_else(|| {
                ConcrntError::InvalidInput(format!(
                    "association typed id must start with 'a': {id}"
                ))
            })?
        } else {
            id
        };
        if bare.len() != 26 {
            return Err(ConcrntError::InvalidInput(format!(
                "association id must be 26 characters: {id}"
            )));
        }
        Ok(bare.to_string())
    }

    pub async fn create(&self, association: Association) -> Result<Association> {
        let bare = Self::normalize_id(&association.id)?;
        let schema_id = self.schema.url_to_id(&association.schema).await?;

        let record = AssociationRecord {
            _id: bare,
            author: association.author.clone(),
            owner: association.owner.clone(),
            schema_id,
            variant: association.variant.clone(),
            target: association.target.clone(),
            document: association.document.clone(),
            signature: association.signature.clone(),
            timelines: association.timelines.clone(),
            cdate: association.cdate,
        };
        self.collection.insert_one(&record).await?;
        self.to_model(record).await
    }

    pub async fn get(&self, id: &str) -> Result<Association> {
        let bare = Self::normalize_id(id)?;
        let record = self
            .collection
            .find_one(doc! { "_id": bare })
            .await?
            .ok_or_else(|| ConcrntError::NotFound(format!("association {id}")))?;
        self.to_model(record).await
    }

    pub async fn get_by_target(&self, target: &str) -> Result<Vec<Association>> {
        let records = self
            .collection
            .find_many(doc! { "target": target }, Some(doc! { "cdate": -1 }), None)
            .await?;
        self.to_models(records).await
    }

    pub async fn get_own_by_target(&self, author: &str, target: &str) -> Result<Vec<Association>> {
        let records = self
            .collection
            .find_many(doc! { "author": author, "target": target }, None, None)
            .await?;
        self.to_models(records).await
    }

    pub async fn count_by_target(&self, target: &str) -> Result<i64> {
        self.collection.count(doc! { "target": target }).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let bare = Self::normalize_id(id)?;
        if !self.collection.delete_one(doc! { "_id": bare }).await? {
            return Err(ConcrntError::NotFound(format!("association {id}")));
        }
        Ok(())
    }

    pub async fn clean(&self, author: &str) -> Result<u64> {
        Ok(self.collection.delete_many(doc! { "author": author }).await?)
    }

    async fn to_models(&self, records: Vec<AssociationRecord>) -> Result<Vec<Association>> {
        let mut associations = Vec::with_capacity(records.len());
        for record in records {
            associations.push(self.to_model(record).await?);
        }
        Ok(associations)
    }

    async fn to_model(&self, record: AssociationRecord) -> Result<Association> {
        let schema = self.schema.id_to_url(record.schema_id).await?;
        Ok(Association {
            id: format!("a{}", record._id),
            author: record.author,
            owner: record.owner,
            schema,
            variant: record.variant,
            target: record.target,
            document: record.document,
            signature: record.signature,
            timelines: record.timelines,
            cdate: record.cdate,
        })
    }
}
