//! Acks - directed acknowledgement edges between entities

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::{IntoIndexes, MongoClient, MongoCollection};
use crate::document::{doc_type, AckDocument};
use crate::model::Ack;
use crate::types::{ConcrntError, Result};

pub const ACK_COLLECTION: &str = "acks";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRecord {
    pub from: String,
    pub to: String,
    pub document: String,
    pub signature: String,
    /// false once unacked; the edge history stays queryable
    pub valid: bool,
}

impl IntoIndexes for AckRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "from": 1, "to": 1 },
                Some(IndexOptions::builder().unique(true).build()),
            ),
            (doc! { "to": 1 }, None),
        ]
    }
}

impl From<AckRecord> for Ack {
    fn from(r: AckRecord) -> Self {
        Ack {
            from: r.from,
            to: r.to,
            document: r.document,
            signature: r.signature,
        }
    }
}

#[derive(Clone)]
pub struct AckService {
    collection: MongoCollection<AckRecord>,
}

impl AckService {
    pub async fn new(db: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: db.collection(ACK_COLLECTION).await?,
        })
    }

    /// Apply an `ack` or `unack` document. The signer must be the `from`
    /// side of the edge.
    // TODO: forward acks whose `to` entity lives on another domain
    pub async fn ack(&self, document: &str, signature: &str) -> Result<()> {
        let doc: AckDocument = serde_json::from_str(document)?;

        if doc.base.signer != doc.from {
            return Err(ConcrntError::InvalidInput(
                "ack must be signed by its `from` entity".into(),
            ));
        }

        let valid = match doc.base.doc_type.as_str() {
            doc_type::ACK => true,
            doc_type::UNACK => false,
            other => {
                return Err(ConcrntError::InvalidInput(format!(
                    "not an ack document: {other}"
                )))
            }
        };

        let record = AckRecord {
            from: doc.from.clone(),
            to: doc.to.clone(),
            document: document.to_string(),
            signature: signature.to_string(),
            valid,
        };
        self.collection
            .upsert(doc! { "from": &doc.from, "to": &doc.to }, &record)
            .await?;
        Ok(())
    }

    /// Entities acknowledging `ccid`.
    pub async fn get_acker(&self, ccid: &str) -> Result<Vec<Ack>> {
        let records = self
            .collection
            .find_many(doc! { "to": ccid, "valid": true }, None, None)
            .await?;
        Ok(records.into_iter().map(Ack::from).collect())
    }

    /// Entities `ccid` acknowledges.
    pub async fn get_acking(&self, ccid: &str) -> Result<Vec<Ack>> {
        let records = self
            .collection
            .find_many(doc! { "from": ccid, "valid": true }, None, None)
            .await?;
        Ok(records.into_iter().map(Ack::from).collect())
    }

    pub async fn clean(&self, ccid: &str) -> Result<()> {
        self.collection
            .delete_many(doc! { "$or": [ { "from": ccid }, { "to": ccid } ] })
            .await?;
        Ok(())
    }
}
