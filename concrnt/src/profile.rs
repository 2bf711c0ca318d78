//! Profiles - schema-shaped self descriptions

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::cdid::Cdid;
use crate::crypto;
use crate::db::{IntoIndexes, MongoClient, MongoCollection};
use crate::document::{DeleteDocument, ProfileDocument};
use crate::model::Profile;
use crate::schema::SchemaService;
use crate::semanticid::SemanticIdService;
use crate::types::{ConcrntError, Result};

pub const PROFILE_COLLECTION: &str = "profiles";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// 26-character CDID, stored without the `p` prefix
    pub _id: String,
    pub author: String,
    pub schema_id: i32,
    pub document: String,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_id: Option<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub cdate: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub mdate: DateTime<Utc>,
}

impl IntoIndexes for ProfileRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(doc! { "author": 1, "schema_id": 1 }, None)]
    }
}

#[derive(Clone)]
pub struct ProfileService {
    collection: MongoCollection<ProfileRecord>,
    schema: SchemaService,
    semanticid: SemanticIdService,
}

impl ProfileService {
    pub async fn new(
        db: &MongoClient,
        schema: SchemaService,
        semanticid: SemanticIdService,
    ) -> Result<Self> {
        Ok(Self {
            collection: db.collection(PROFILE_COLLECTION).await?,
            schema,
            semanticid,
        })
    }

    fn normalize_id(id: &str) -> Result<String> {
        let bare = if id.len() == 27 {
            id.strip_prefix('p').ok_or_else(|| {
                ConcrntError::InvalidInput(format!("profile typed id must start with 'p': {id}"))
            })?
        } else {
            id
        };
        if bare.len() != 26 {
            return Err(ConcrntError::InvalidInput(format!(
                "profile id must be 26 characters: {id}"
            )));
        }
        Ok(bare.to_string())
    }

    /// Create or overwrite a profile. Only the author may overwrite; the
    /// optional semantic id is (re)bound to the stored profile.
    pub async fn upsert(&self, document: &str, signature: &str) -> Result<Profile> {
        let mut doc: ProfileDocument = serde_json::from_str(document)?;

        if !doc.base.semantic_id.is_empty() && doc.base.id.is_empty() {
            if let Ok(existing) = self
                .semanticid
                .lookup(&doc.base.semantic_id, &doc.base.signer)
                .await
            {
                doc.base.id = existing;
            }
        }

        if doc.base.id.is_empty() {
            let digest = crypto::keccak256(document.as_bytes());
            let mut hash10 = [0u8; 10];
            hash10.copy_from_slice(&digest[..10]);
            doc.base.id = Cdid::new(hash10, doc.base.signed_at).to_string();
        }

        let bare = Self::normalize_id(&doc.base.id)?;
        let existing = self.collection.find_one(doc! { "_id": &bare }).await?;
        if let Some(ref existing) = existing {
            if existing.author != doc.base.signer {
                return Err(ConcrntError::PermissionDenied(
                    "only the author may update a profile".into(),
                ));
            }
        }

        let schema_id = self.schema.url_to_id(&doc.base.schema).await?;
        let record = ProfileRecord {
            _id: bare.clone(),
            author: doc.base.signer.clone(),
            schema_id,
            document: document.to_string(),
            signature: signature.to_string(),
            semantic_id: if doc.base.semantic_id.is_empty() {
                None
            } else {
                Some(doc.base.semantic_id.clone())
            },
            cdate: existing.map(|e| e.cdate).unwrap_or_else(Utc::now),
            mdate: Utc::now(),
        };
        self.collection.upsert(doc! { "_id": &bare }, &record).await?;

        let profile = self.to_model(record).await?;

        if !doc.base.semantic_id.is_empty() {
            self.semanticid
                .name(
                    &doc.base.semantic_id,
                    &doc.base.signer,
                    &profile.id,
                    document,
                    signature,
                )
                .await?;
        }

        Ok(profile)
    }

    pub async fn get(&self, id: &str) -> Result<Profile> {
        let bare = Self::normalize_id(id)?;
        let record = self
            .collection
            .find_one(doc! { "_id": bare })
            .await?
            .ok_or_else(|| ConcrntError::NotFound(format!("profile {id}")))?;
        self.to_model(record).await
    }

    pub async fn get_by_author(&self, author: &str) -> Result<Vec<Profile>> {
        let records = self
            .collection
            .find_many(doc! { "author": author }, None, None)
            .await?;
        self.to_models(records).await
    }

    pub async fn get_by_author_and_schema(
        &self,
        author: &str,
        schema: &str,
    ) -> Result<Vec<Profile>> {
        let schema_id = self.schema.url_to_id(schema).await?;
        let records = self
            .collection
            .find_many(doc! { "author": author, "schema_id": schema_id }, None, None)
            .await?;
        self.to_models(records).await
    }

    pub async fn get_by_semantic_id(&self, semantic_id: &str, owner: &str) -> Result<Profile> {
        let target = self.semanticid.lookup(semantic_id, owner).await?;
        self.get(&target).await
    }

    /// Delete a profile; the signer must be the author.
    pub async fn delete(&self, document: &str) -> Result<Profile> {
        let doc: DeleteDocument = serde_json::from_str(document)?;

        let profile = self.get(&doc.target).await?;
        if profile.author != doc.base.signer {
            return Err(ConcrntError::PermissionDenied(
                "only the author may delete a profile".into(),
            ));
        }

        let bare = Self::normalize_id(&profile.id)?;
        self.collection.delete_one(doc! { "_id": bare }).await?;
        if let Some(ref semantic_id) = profile.semantic_id {
            self.semanticid.delete(semantic_id, &profile.author).await?;
        }
        Ok(profile)
    }

    pub async fn clean(&self, ccid: &str) -> Result<()> {
        self.collection.delete_many(doc! { "author": ccid }).await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        self.collection.count(doc! {}).await
    }

    async fn to_models(&self, records: Vec<ProfileRecord>) -> Result<Vec<Profile>> {
        let mut profiles = Vec::with_capacity(records.len());
        for record in records {
            profiles.push(self.to_model(record).await?);
        }
        Ok(profiles)
    }

    async fn to_model(&self, record: ProfileRecord) -> Result<Profile> {
        let schema = self.schema.id_to_url(record.schema_id).await?;
        Ok(Profile {
            id: format!("p{}", record._id),
            author: record.author,
            schema,
            document: record.document,
            signature: record.signature,
            semantic_id: record.semantic_id,
            cdate: record.cdate,
            mdate: record.mdate,
        })
    }
}
