//! Timeline repository - rows, chunk caches and the event bus
//!
//! Cache protocol for a timeline `T` at epoch `E`:
//!
//! - `tl:itr:<T>:<E>` holds the label of the epoch whose body actually
//!   contains items at or before `E`. Written on item creation and
//!   recovered on read by a max-cdate query.
//! - `tl:body:<T>:<E>` holds a comma-prefixed JSON list of items in
//!   reverse-chronological order. The leading comma makes head insertion a
//!   plain byte prepend; readers strip it and wrap the rest in brackets.
//!
//! Readers that observe the iterator always find the item in the body or
//! discover a newer epoch; a cache failure of any kind degrades to the
//! database.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

use chunk_cache_core::{time_to_chunk, CacheStore};

use crate::client::ApiClient;
use crate::config::Args;
use crate::db::{IntoIndexes, MongoClient, MongoCollection};
use crate::model::{Chunk, Event, Timeline, TimelineItem};
use crate::pubsub::EventHub;
use crate::schema::SchemaService;
use crate::types::{ConcrntError, Result};

pub const TIMELINE_COLLECTION: &str = "timelines";
pub const TIMELINE_ITEM_COLLECTION: &str = "timeline_items";

const NORMALIZATION_CACHE_PREFIX: &str = "tl:norm:";
const NORMALIZATION_CACHE_TTL: Duration = Duration::from_secs(60 * 15);

const ITR_CACHE_PREFIX: &str = "tl:itr:";
const BODY_CACHE_PREFIX: &str = "tl:body:";

const REMOTE_TIMELINE_CACHE_PREFIX: &str = "timeline:";
const REMOTE_TIMELINE_CACHE_TTL: Duration = Duration::from_secs(300);

const COUNT_CACHE_KEY: &str = "timeline_count";

const DEFAULT_CHUNK_SIZE: i64 = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineRecord {
    /// 26-character CDID, stored without the `t` prefix
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
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub cdate: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub mdate: DateTime<Utc>,
}

impl IntoIndexes for TimelineRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (doc! { "author": 1 }, None),
            (doc! { "schema_id": 1 }, None),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItemRecord {
    /// 26-character timeline id, no prefix
    pub timeline_id: String,
    /// Typed resource id (`m...`, `a...`)
    pub resource_id: String,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub schema_id: i32,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub cdate: DateTime<Utc>,
}

impl IntoIndexes for TimelineItemRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "timeline_id": 1, "resource_id": 1 },
                Some(IndexOptions::builder().unique(true).build()),
            ),
            (doc! { "timeline_id": 1, "cdate": -1 }, None),
            (doc! { "resource_id": 1 }, None),
        ]
    }
}

#[derive(Clone)]
pub struct TimelineRepository {
    timelines: MongoCollection<TimelineRecord>,
    items: MongoCollection<TimelineItemRecord>,
    cache: Arc<CacheStore>,
    hub: Arc<EventHub>,
    client: ApiClient,
    schema: SchemaService,
    config: Args,
}

impl TimelineRepository {
    pub async fn new(
        db: &MongoClient,
        cache: Arc<CacheStore>,
        hub: Arc<EventHub>,
        client: ApiClient,
        schema: SchemaService,
        config: Args,
    ) -> Result<Self> {
        let repo = Self {
            timelines: db.collection(TIMELINE_COLLECTION).await?,
            items: db.collection(TIMELINE_ITEM_COLLECTION).await?,
            cache,
            hub,
            client,
            schema,
            config,
        };
        match repo.timelines.count(doc! {}).await {
            Ok(count) => repo.cache.set(COUNT_CACHE_KEY, count.to_string()),
            Err(e) => warn!(error = %e, "failed to seed timeline counter"),
        }
        Ok(repo)
    }

    /// Strip `@<our-fqdn>` and the `t` prefix down to the 26-char row key.
    fn normalize_local_db_id(&self, id: &str) -> Result<String> {
        let mut normalized = id;
        if let Some((head, domain)) = id.rsplit_once('@') {
            if domain != self.config.fqdn {
                return Err(ConcrntError::InvalidInput(format!(
                    "timeline {id} is not hosted here"
                )));
            }
            normalized = head;
        }
        let normalized = if normalized.len() == 27 {
            normalized.strip_prefix('t').ok_or_else(|| {
                ConcrntError::InvalidInput(format!("timeline typed id must start with 't': {id}"))
            })?
        } else {
            normalized
        };
        if normalized.len() != 26 {
            return Err(ConcrntError::InvalidInput(format!(
                "timeline id must be 26 characters: {id}"
            )));
        }
        Ok(normalized.to_string())
    }

    fn fqid(&self, bare_id: &str) -> String {
        format!("t{}@{}", bare_id, self.config.fqdn)
    }

    // ------------------------------------------------------------------
    // Chunk iterators
    // ------------------------------------------------------------------

    /// Resolve the body-holding epoch for each timeline at `epoch`.
    /// Input ids are normalized fully-qualified ids.
    pub async fn lookup_chunk_itrs(
        &self,
        normalized: &[String],
        epoch: &str,
    ) -> HashMap<String, String> {
        let keys: Vec<String> = normalized
            .iter()
            .map(|t| format!("{ITR_CACHE_PREFIX}{t}:{epoch}"))
            .collect();
        let cached = self.cache.get_multi(&keys);

        let mut result = HashMap::new();
        let mut missed = Vec::new();
        for (timeline, key) in normalized.iter().zip(&keys) {
            match cached.get(key) {
                Some(value) => {
                    result.insert(
                        timeline.clone(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
                None => missed.push(timeline.clone()),
            }
        }

        for (domain, timelines) in group_by_domain(&missed) {
            let found = if domain == self.config.fqdn {
                self.lookup_local_itrs(&timelines, epoch).await
            } else {
                self.lookup_remote_itrs(&domain, &timelines, epoch).await
            };
            match found {
                Ok(found) => result.extend(found),
                Err(e) => {
                    // a slow peer or db hiccup loses those timelines for
                    // this read, never the whole reply
                    warn!(domain = domain.as_str(), error = %e, "chunk iterator lookup failed");
                }
            }
        }

        result
    }

    async fn lookup_local_itrs(
        &self,
        timelines: &[String],
        epoch: &str,
    ) -> Result<HashMap<String, String>> {
        let mut dbids = Vec::new();
        for timeline in timelines {
            match self.normalize_local_db_id(timeline) {
                Ok(id) => dbids.push(id),
                Err(e) => warn!(timeline = timeline.as_str(), error = %e, "skipping timeline"),
            }
        }

        let mut result = HashMap::new();
        if dbids.is_empty() {
            return Ok(result);
        }

        let bound = bson::DateTime::from_chrono(chunk_cache_core::chunk_to_recent_time(epoch));
        let rows = self
            .items
            .aggregate(vec![
                doc! { "$match": {
                    "timeline_id": { "$in": &dbids },
                    "cdate": { "$lte": bound },
                } },
                doc! { "$group": {
                    "_id": "$timeline_id",
                    "max_c_date": { "$max": "$cdate" },
                } },
            ])
            .await?;

        for row in rows {
            let (Ok(id), Ok(max_cdate)) = (row.get_str("_id"), row.get_datetime("max_c_date"))
            else {
                continue;
            };
            let fqid = self.fqid(id);
            let value = time_to_chunk(max_cdate.to_chrono());
            self.cache
                .set(&format!("{ITR_CACHE_PREFIX}{fqid}:{epoch}"), value.clone());
            result.insert(fqid, value);
        }

        Ok(result)
    }

    async fn lookup_remote_itrs(
        &self,
        domain: &str,
        timelines: &[String],
        epoch: &str,
    ) -> Result<HashMap<String, String>> {
        let result = self.client.get_chunk_itrs(domain, timelines, epoch).await?;

        let current_chunk = time_to_chunk(Utc::now());
        let subs = self.list_current_subs();
        for (timeline, itr) in &result {
            // the newest chunk keeps changing; only a live subscription
            // keeps that cache warm, so only then is it safe to hold
            if *epoch == current_chunk && !subs.contains(timeline) {
                continue;
            }
            self.cache
                .set(&format!("{ITR_CACHE_PREFIX}{timeline}:{epoch}"), itr.clone());
        }

        Ok(result)
    }

    // ------------------------------------------------------------------
    // Chunk bodies
    // ------------------------------------------------------------------

    /// Load chunk bodies; `query` maps a fully-qualified timeline id to the
    /// epoch whose body should be served (usually an iterator result).
    pub async fn load_chunk_bodies(
        &self,
        query: &HashMap<String, String>,
    ) -> HashMap<String, Chunk> {
        let mut keys = Vec::new();
        let mut keytable = HashMap::new();
        for (timeline, epoch) in query {
            let key = format!("{BODY_CACHE_PREFIX}{timeline}:{epoch}");
            keys.push(key.clone());
            keytable.insert(key, timeline.clone());
        }

        let cached = self.cache.get_multi(&keys);

        let mut result = HashMap::new();
        let mut missed: HashMap<String, String> = HashMap::new();
        for key in &keys {
            let timeline = &keytable[key];
            match cached.get(key) {
                Some(raw) => match parse_body(raw) {
                    Ok(items) => {
                        result.insert(
                            timeline.clone(),
                            Chunk {
                                key: key.clone(),
                                epoch: query[timeline].clone(),
                                items,
                            },
                        );
                    }
                    Err(e) => {
                        error!(key = key.as_str(), error = %e, "corrupt chunk body dropped");
                        self.cache.delete(key);
                        missed.insert(timeline.clone(), query[timeline].clone());
                    }
                },
                None => {
                    missed.insert(timeline.clone(), query[timeline].clone());
                }
            }
        }

        let mut domain_map: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (timeline, epoch) in missed {
            if let Some((_, domain)) = timeline.rsplit_once('@') {
                domain_map
                    .entry(domain.to_string())
                    .or_default()
                    .insert(timeline, epoch);
            }
        }

        for (domain, subquery) in domain_map {
            if domain == self.config.fqdn {
                for (timeline, epoch) in subquery {
                    match self.load_local_body(&timeline, &epoch).await {
                        Ok(chunk) => {
                            result.insert(timeline, chunk);
                        }
                        Err(e) => warn!(timeline = timeline.as_str(), error = %e, "local body load failed"),
                    }
                }
            } else {
                match self.load_remote_bodies(&domain, &subquery).await {
                    Ok(chunks) => result.extend(chunks),
                    Err(e) => warn!(domain = domain.as_str(), error = %e, "remote body load failed"),
                }
            }
        }

        result
    }

    async fn load_local_body(&self, timeline: &str, epoch: &str) -> Result<Chunk> {
        let chunk_date = chunk_cache_core::chunk_to_recent_time(epoch);
        let epoch_start = chunk_cache_core::chunk_to_recent_time(&chunk_cache_core::prev_chunk(epoch));

        let dbid = self.normalize_local_db_id(timeline)?;

        let mut records = self
            .items
            .find_many(
                doc! {
                    "timeline_id": &dbid,
                    "cdate": { "$lte": bson::DateTime::from_chrono(chunk_date) },
                },
                Some(doc! { "cdate": -1 }),
                Some(DEFAULT_CHUNK_SIZE),
            )
            .await?;

        // the limited read may stop inside the epoch and hide older items
        // of the same chunk; re-read the full epoch range in that case
        if let Some(oldest) = records.last() {
            if oldest.cdate > epoch_start {
                records = self
                    .items
                    .find_many(
                        doc! {
                            "timeline_id": &dbid,
                            "cdate": {
                                "$gt": bson::DateTime::from_chrono(epoch_start),
                                "$lte": bson::DateTime::from_chrono(chunk_date),
                            },
                        },
                        Some(doc! { "cdate": -1 }),
                        None,
                    )
                    .await?;
            }
        }

        let items: Vec<TimelineItem> = records
            .into_iter()
            .map(|r| self.item_to_model(r))
            .collect();

        let key = format!("{BODY_CACHE_PREFIX}{timeline}:{epoch}");
        if !items.is_empty() {
            self.cache.set(&key, render_body(&items)?);
        }

        Ok(Chunk {
            key,
            epoch: epoch.to_string(),
            items,
        })
    }

    async fn load_remote_bodies(
        &self,
        domain: &str,
        query: &HashMap<String, String>,
    ) -> Result<HashMap<String, Chunk>> {
        let result = self.client.get_chunk_bodies(domain, query).await?;

        let current_chunk = time_to_chunk(Utc::now());
        let subs = self.list_current_subs();
        for (timeline, chunk) in &result {
            if chunk.epoch == current_chunk && !subs.contains(timeline) {
                continue;
            }
            let key = format!("{BODY_CACHE_PREFIX}{timeline}:{}", chunk.epoch);
            match render_body(&chunk.items) {
                Ok(body) => self.cache.set(&key, body),
                Err(e) => warn!(timeline = timeline.as_str(), error = %e, "chunk body render failed"),
            }
        }

        Ok(result)
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    pub async fn get_item(&self, timeline_id: &str, resource_id: &str) -> Result<TimelineItem> {
        let dbid = self.normalize_local_db_id(timeline_id)?;
        let record = self
            .items
            .find_one(doc! { "timeline_id": dbid, "resource_id": resource_id })
            .await?
            .ok_or_else(|| {
                ConcrntError::NotFound(format!("item {resource_id} in {timeline_id}"))
            })?;
        Ok(self.item_to_model(record))
    }

    /// Insert one item and maintain the chunk caches: the iterator is
    /// repointed to the item's own epoch and the item is prepended to that
    /// epoch's body.
    ///
    /// The write assumes the item is the newest in its timeline; backfill
    /// into older epochs would require invalidating every iterator between
    /// the insert epoch and the current one.
    pub async fn create_item(&self, item: TimelineItem) -> Result<TimelineItem> {
        let dbid = self.normalize_local_db_id(&item.timeline_id)?;
        let schema_id = self.schema.url_to_id(&item.schema).await?;

        let record = TimelineItemRecord {
            timeline_id: dbid.clone(),
            resource_id: item.resource_id.clone(),
            owner: item.owner.clone(),
            author: item.author.clone(),
            schema_id,
            cdate: item.cdate,
        };
        self.items.insert_one(&record).await.map_err(|e| match e {
            ConcrntError::AlreadyExists(_) => ConcrntError::AlreadyExists(format!(
                "item {} already in timeline {}",
                item.resource_id, dbid
            )),
            other => other,
        })?;

        let fqid = self.fqid(&dbid);
        let cached_item = TimelineItem {
            timeline_id: fqid.clone(),
            ..item.clone()
        };

        let item_chunk = time_to_chunk(item.cdate);
        let itr_key = format!("{ITR_CACHE_PREFIX}{fqid}:{item_chunk}");
        let body_key = format!("{BODY_CACHE_PREFIX}{fqid}:{item_chunk}");

        // If the iterator for this epoch still points at an older body
        // block (the timeline was quiet for a while), repoint it, or the
        // prepend below lands in a block no reader will consult.
        self.cache.replace(&itr_key, item_chunk.clone());
        let entry = format!(",{}", serde_json::to_string(&cached_item)?);
        self.cache.prepend(&body_key, entry.as_bytes());

        debug!(timeline = fqid.as_str(), resource = item.resource_id.as_str(), "item created");

        Ok(TimelineItem {
            timeline_id: format!("t{dbid}"),
            ..item
        })
    }

    pub async fn delete_item(&self, timeline_id: &str, resource_id: &str) -> Result<()> {
        let dbid = self.normalize_local_db_id(timeline_id)?;
        self.items
            .delete_many(doc! { "timeline_id": dbid, "resource_id": resource_id })
            .await?;
        Ok(())
    }

    /// Remove a resource from every timeline it was fanned out to.
    pub async fn delete_item_by_resource_id(&self, resource_id: &str) -> Result<()> {
        self.items
            .delete_many(doc! { "resource_id": resource_id })
            .await?;
        Ok(())
    }

    pub async fn get_recent_items(
        &self,
        timeline_id: &str,
        until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TimelineItem>> {
        let dbid = self.normalize_local_db_id(timeline_id)?;
        let records = self
            .items
            .find_many(
                doc! {
                    "timeline_id": dbid,
                    "cdate": { "$lt": bson::DateTime::from_chrono(until) },
                },
                Some(doc! { "cdate": -1 }),
                Some(limit),
            )
            .await?;
        Ok(records.into_iter().map(|r| self.item_to_model(r)).collect())
    }

    pub async fn get_immediate_items(
        &self,
        timeline_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TimelineItem>> {
        let dbid = self.normalize_local_db_id(timeline_id)?;
        let records = self
            .items
            .find_many(
                doc! {
                    "timeline_id": dbid,
                    "cdate": { "$gt": bson::DateTime::from_chrono(since) },
                },
                Some(doc! { "cdate": 1 }),
                Some(limit),
            )
            .await?;
        Ok(records.into_iter().map(|r| self.item_to_model(r)).collect())
    }

    pub async fn query(
        &self,
        timeline_id: &str,
        schema: &str,
        owner: &str,
        author: &str,
        until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TimelineItem>> {
        let mut filter = doc! {
            "cdate": { "$lt": bson::DateTime::from_chrono(until) },
        };
        if !timeline_id.is_empty() {
            filter.insert("timeline_id", self.normalize_local_db_id(timeline_id)?);
        }
        if !schema.is_empty() {
            filter.insert("schema_id", self.schema.url_to_id(schema).await?);
        }
        if !owner.is_empty() {
            filter.insert("owner", owner);
        }
        if !author.is_empty() {
            filter.insert("author", author);
        }

        let records = self
            .items
            .find_many(filter, Some(doc! { "cdate": -1 }), Some(limit))
            .await?;
        Ok(records.into_iter().map(|r| self.item_to_model(r)).collect())
    }

    fn item_to_model(&self, record: TimelineItemRecord) -> TimelineItem {
        TimelineItem {
            timeline_id: self.fqid(&record.timeline_id),
            resource_id: record.resource_id,
            owner: record.owner,
            author: record.author,
            // the interned id is resolved lazily by callers that need the
            // URL; items on the hot read path carry it through untouched
            schema: String::new(),
            cdate: record.cdate,
        }
    }

    // ------------------------------------------------------------------
    // Timelines
    // ------------------------------------------------------------------

    pub async fn get_timeline(&self, id: &str) -> Result<Timeline> {
        let dbid = self.normalize_local_db_id(id)?;
        let record = self
            .timelines
            .find_one(doc! { "_id": dbid })
            .await?
            .ok_or_else(|| ConcrntError::NotFound(format!("timeline {id}")))?;
        self.timeline_to_model(record).await
    }

    pub async fn upsert_timeline(&self, timeline: Timeline) -> Result<Timeline> {
        let dbid = self.normalize_local_db_id(&timeline.id)?;
        let schema_id = self.schema.url_to_id(&timeline.schema).await?;
        let policy_id = if timeline.policy.is_empty() {
            0
        } else {
            self.schema.url_to_id(&timeline.policy).await?
        };

        let existing = self.timelines.find_one(doc! { "_id": &dbid }).await?;
        let is_new = existing.is_none();

        let record = TimelineRecord {
            _id: dbid.clone(),
            author: timeline.author.clone(),
            indexable: timeline.indexable,
            domain_owned: timeline.domain_owned,
            schema_id,
            policy_id,
            policy_params: timeline.policy_params.clone(),
            document: timeline.document.clone(),
            signature: timeline.signature.clone(),
            cdate: existing.map(|e| e.cdate).unwrap_or_else(Utc::now),
            mdate: Utc::now(),
        };
        self.timelines.upsert(doc! { "_id": &dbid }, &record).await?;

        if is_new && self.cache.incr(COUNT_CACHE_KEY, 1).is_none() {
            self.cache.delete(COUNT_CACHE_KEY);
        }

        self.timeline_to_model(record).await
    }

    pub async fn delete_timeline(&self, id: &str) -> Result<()> {
        let dbid = self.normalize_local_db_id(id)?;
        self.items.delete_many(doc! { "timeline_id": &dbid }).await?;
        if !self.timelines.delete_one(doc! { "_id": &dbid }).await? {
            return Err(ConcrntError::NotFound(format!("timeline {id}")));
        }
        if self.cache.decr(COUNT_CACHE_KEY, 1).is_none() {
            self.cache.delete(COUNT_CACHE_KEY);
        }
        Ok(())
    }

    pub async fn list_timeline_by_schema(&self, schema: &str) -> Result<Vec<Timeline>> {
        let schema_id = self.schema.url_to_id(schema).await?;
        let records = self
            .timelines
            .find_many(doc! { "schema_id": schema_id, "indexable": true }, None, None)
            .await?;
        self.timelines_to_models(records).await
    }

    pub async fn list_timeline_by_author(&self, author: &str) -> Result<Vec<Timeline>> {
        let records = self
            .timelines
            .find_many(doc! { "author": author }, None, None)
            .await?;
        self.timelines_to_models(records).await
    }

    pub async fn list_timeline_by_author_owned(&self, author: &str) -> Result<Vec<Timeline>> {
        let records = self
            .timelines
            .find_many(doc! { "author": author, "domain_owned": false }, None, None)
            .await?;
        self.timelines_to_models(records).await
    }

    async fn timelines_to_models(&self, records: Vec<TimelineRecord>) -> Result<Vec<Timeline>> {
        let mut timelines = Vec::with_capacity(records.len());
        for record in records {
            timelines.push(self.timeline_to_model(record).await?);
        }
        Ok(timelines)
    }

    async fn timeline_to_model(&self, record: TimelineRecord) -> Result<Timeline> {
        let schema = self.schema.id_to_url(record.schema_id).await?;
        let policy = if record.policy_id == 0 {
            String::new()
        } else {
            self.schema.id_to_url(record.policy_id).await?
        };
        Ok(Timeline {
            id: format!("t{}", record._id),
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

    /// Fetch a remote timeline, memoized for five minutes.
    pub async fn get_timeline_from_remote(&self, host: &str, key: &str) -> Result<Timeline> {
        let cache_key = format!("{REMOTE_TIMELINE_CACHE_PREFIX}{key}@{host}");
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(timeline) = serde_json::from_slice(&cached) {
                return Ok(timeline);
            }
        }

        let timeline = self.client.get_timeline(host, key).await?;

        match serde_json::to_vec(&timeline) {
            Ok(body) => self
                .cache
                .set_with_ttl(&cache_key, body, REMOTE_TIMELINE_CACHE_TTL),
            Err(e) => warn!(error = %e, "failed to cache remote timeline"),
        }

        Ok(timeline)
    }

    pub async fn count(&self) -> Result<i64> {
        if let Some(cached) = self.cache.get(COUNT_CACHE_KEY) {
            if let Ok(count) = String::from_utf8_lossy(&cached).parse() {
                return Ok(count);
            }
        }
        let count = self.timelines.count(doc! {}).await?;
        self.cache.set(COUNT_CACHE_KEY, count.to_string());
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Normalization memo
    // ------------------------------------------------------------------

    pub fn get_normalization_cache(&self, timeline_id: &str) -> Option<String> {
        self.cache
            .get(&format!("{NORMALIZATION_CACHE_PREFIX}{timeline_id}"))
            .map(|v| String::from_utf8_lossy(&v).into_owned())
    }

    pub fn set_normalization_cache(&self, timeline_id: &str, value: &str) {
        self.cache.set_with_ttl(
            &format!("{NORMALIZATION_CACHE_PREFIX}{timeline_id}"),
            value.as_bytes().to_vec(),
            NORMALIZATION_CACHE_TTL,
        );
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Publish to the timeline's channel. Never fails: losing an event to
    /// a closed bus only costs liveness, not durability.
    pub fn publish_event(&self, event: Event) {
        self.hub.publish(event);
    }

    /// Forward events for `channels` into `tx` until every receiver or the
    /// consumer goes away. Lagged subscribers skip frames rather than
    /// stalling the bus.
    pub async fn subscribe(&self, channels: &[String], tx: mpsc::Sender<Event>) {
        if channels.is_empty() {
            return;
        }
        let receivers = self.hub.subscribe(channels);
        let mut merged = tokio_stream::StreamMap::new();
        for (i, rx) in receivers.into_iter().enumerate() {
            merged.insert(i, BroadcastStream::new(rx));
        }
        while let Some((_, item)) = merged.next().await {
            match item {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                Err(_) => continue, // lagged; drop and keep streaming
            }
        }
    }

    /// Channels with at least one live subscriber, restricted to
    /// well-formed fully-qualified ids.
    pub fn list_current_subs(&self) -> Vec<String> {
        self.hub
            .channels()
            .into_iter()
            .filter(|c| c.split('@').count() == 2)
            .collect()
    }

    /// Subscriber counts per channel, for the peering agent and metrics.
    pub fn list_timeline_subscriptions(&self) -> HashMap<String, usize> {
        self.hub.subscriber_counts()
    }
}

/// Group fully-qualified ids by their suffix domain. Ids without a domain
/// are dropped; they cannot be routed.
fn group_by_domain(timelines: &[String]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for timeline in timelines {
        if let Some((_, domain)) = timeline.rsplit_once('@') {
            map.entry(domain.to_string()).or_default().push(timeline.clone());
        }
    }
    map
}

/// Parse a comma-prefixed body blob back into items.
fn parse_body(raw: &[u8]) -> Result<Vec<TimelineItem>> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| ConcrntError::Internal(format!("body not utf8: {e}")))?;
    let inner = text.strip_prefix(',').unwrap_or(text);
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&format!("[{inner}]"))?)
}

/// Render items as a comma-prefixed blob: `,{item},{item}`.
fn render_body(items: &[TimelineItem]) -> Result<Vec<u8>> {
    let mut out = String::new();
    for item in items {
        out.push(',');
        out.push_str(&serde_json::to_string(item)?);
    }
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(n: u32) -> TimelineItem {
        TimelineItem {
            timeline_id: "tabcdefghijklmnopqrstuvwxyz@local.example.com".into(),
            resource_id: format!("m{n:026}"),
            owner: "con1owner".into(),
            author: None,
            schema: String::new(),
            cdate: Utc.timestamp_opt(1_704_067_200 + n as i64, 0).unwrap(),
        }
    }

    #[test]
    fn body_roundtrip_preserves_order() {
        let items = vec![item(2), item(1), item(0)];
        let rendered = render_body(&items).unwrap();
        assert!(rendered.starts_with(b","));
        let parsed = parse_body(&rendered).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].resource_id, items[0].resource_id);
        assert_eq!(parsed[2].resource_id, items[2].resource_id);
    }

    #[test]
    fn prepend_then_parse_yields_new_head() {
        let cache = CacheStore::new();
        let key = "tl:body:t@d:2024-01-01T00:00:00Z";
        cache.set(key, render_body(&[item(1), item(0)]).unwrap());
        let newer = format!(",{}", serde_json::to_string(&item(2)).unwrap());
        assert!(cache.prepend(key, newer.as_bytes()));
        let parsed = parse_body(&cache.get(key).unwrap()).unwrap();
        assert_eq!(parsed[0].resource_id, item(2).resource_id);
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn empty_body_parses_to_no_items() {
        assert!(parse_body(b",").unwrap().is_empty());
        assert!(parse_body(b"").unwrap().is_empty());
    }

    #[test]
    fn grouping_by_domain_drops_unroutable_ids() {
        let grouped = group_by_domain(&[
            "ta@x.example".into(),
            "tb@x.example".into(),
            "tc@y.example".into(),
            "bare-id".into(),
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["x.example"].len(), 2);
        assert_eq!(grouped["y.example"], vec!["tc@y.example"]);
    }
}
