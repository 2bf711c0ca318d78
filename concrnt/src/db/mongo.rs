//! MongoDB client and collection wrapper
//!
//! Typed collections declare their indexes through `IntoIndexes`; the
//! wrapper applies them on first access so unique constraints (for example
//! timeline items on `(timeline_id, resource_id)`) exist before the first
//! write races.

use bson::Document;
use futures_util::TryStreamExt;
use mongodb::options::{FindOneOptions, FindOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::types::{ConcrntError, Result};

/// Index declarations for a collection schema.
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("connecting to MongoDB at {}", uri);

        // serverSelectionTimeoutMS keeps startup from hanging on an
        // unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{uri}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        } else {
            format!("{uri}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| ConcrntError::Database(format!("failed to connect: {e}")))?;

        client
            .database(db_name)
            .run_command(bson::doc! { "ping": 1 })
            .await
            .map_err(|e| ConcrntError::Database(format!("ping failed: {e}")))?;

        info!("connected to database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Untyped collection handle for counter documents and other
    /// schema-less bookkeeping.
    pub fn raw_collection(&self, name: &str) -> Collection<Document> {
        self.client.database(&self.db_name).collection(name)
    }

    pub async fn ping(&self) -> Result<()> {
        self.client
            .database(&self.db_name)
            .run_command(bson::doc! { "ping": 1 })
            .await
            .map_err(|e| ConcrntError::Database(format!("ping failed: {e}")))?;
        Ok(())
    }
}

/// Typed collection with automatic index application.
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
{
    async fn new(client: &Client, db_name: &str, name: &str) -> Result<Self> {
        let inner = client.database(db_name).collection::<T>(name);

        let indices: Vec<IndexModel> = T::into_indices()
            .into_iter()
            .map(|(keys, options)| {
                let builder = IndexModel::builder().keys(keys);
                if let Some(options) = options {
                    builder.options(options).build()
                } else {
                    builder.build()
                }
            })
            .collect();

        if !indices.is_empty() {
            inner.create_indexes(indices).await?;
        }

        Ok(Self { inner })
    }

    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        Ok(self.inner.find_one(filter).await?)
    }

    pub async fn find_one_sorted(&self, filter: Document, sort: Document) -> Result<Option<T>> {
        let options = FindOneOptions::builder().sort(sort).build();
        Ok(self.inner.find_one(filter).with_options(options).await?)
    }

    pub async fn find_many(
        &self,
        filter: Document,
        sort: Option<Document>,
        limit: Option<i64>,
    ) -> Result<Vec<T>> {
        let mut options = FindOptions::default();
        options.sort = sort;
        options.limit = limit;
        let cursor = self.inner.find(filter).with_options(options).await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn insert_one(&self, doc: &T) -> Result<()> {
        self.inner.insert_one(doc).await?;
        Ok(())
    }

    /// Replace-or-insert keyed by `filter`.
    pub async fn upsert(&self, filter: Document, doc: &T) -> Result<()> {
        self.inner
            .replace_one(filter, doc)
            .upsert(true)
            .await?;
        Ok(())
    }

    pub async fn update_one(&self, filter: Document, update: Document) -> Result<u64> {
        let result = self.inner.update_one(filter, update).await?;
        Ok(result.modified_count)
    }

    pub async fn delete_one(&self, filter: Document) -> Result<bool> {
        let result = self.inner.delete_one(filter).await?;
        Ok(result.deleted_count > 0)
    }

    pub async fn delete_many(&self, filter: Document) -> Result<u64> {
        let result = self.inner.delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    pub async fn count(&self, filter: Document) -> Result<i64> {
        Ok(self.inner.count_documents(filter).await? as i64)
    }

    /// Aggregation pipeline returning raw documents; used by the timeline
    /// repository for the per-timeline max-cdate iterator recovery.
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let cursor = self.inner.aggregate(pipeline).await?;
        Ok(cursor.try_collect().await?)
    }
}
