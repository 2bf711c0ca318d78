//! Timeline service - normalization, merge, policy and the realtime pump

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chunk_cache_core::time_to_chunk;

use crate::cdid::{self, Cdid};
use crate::config::Args;
use crate::crypto;
use crate::document::{DeleteDocument, EventDocument, RetractDocument, TimelineDocument};
use crate::entity::EntityService;
use crate::model::{Chunk, Event, RequestContext, Timeline, TimelineItem};
use crate::policy::PolicyService;
use crate::semanticid::SemanticIdService;
use crate::subscription::SubscriptionService;
use crate::types::{ConcrntError, Result};

use super::repository::TimelineRepository;

#[derive(Clone)]
pub struct TimelineService {
    repository: TimelineRepository,
    entity: EntityService,
    semanticid: SemanticIdService,
    subscription: SubscriptionService,
    policy: PolicyService,
    config: Args,
    socket_counter: Arc<AtomicI64>,
}

impl TimelineService {
    pub fn new(
        repository: TimelineRepository,
        entity: EntityService,
        semanticid: SemanticIdService,
        subscription: SubscriptionService,
        policy: PolicyService,
        config: Args,
    ) -> Self {
        Self {
            repository,
            entity,
            semanticid,
            subscription,
            policy,
            config,
            socket_counter: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn current_realtime_connection_count(&self) -> i64 {
        self.socket_counter.load(Ordering::Relaxed)
    }

    pub async fn count(&self) -> Result<i64> {
        self.repository.count().await
    }

    /// Canonicalize a timeline reference to one of:
    /// `t<26>@<fqdn>` (resolvable here or at a known peer) or
    /// `<semantic>@<ccid>@<fqdn>` (resolvable only at the remote peer).
    /// Results are memoized for fifteen minutes.
    pub async fn normalize_timeline_id(&self, timeline: &str) -> Result<String> {
        if let Some(cached) = self.repository.get_normalization_cache(timeline) {
            return Ok(cached);
        }

        let split: Vec<&str> = timeline.split('@').collect();
        if split.len() == 1 {
            return Ok(format!("{timeline}@{}", self.config.fqdn));
        }

        let id = split[0];
        let mut domain = split[split.len() - 1].to_string();
        let mut userid = if split.len() == 3 {
            split[1].to_string()
        } else {
            String::new()
        };

        if crypto::is_ccid(&domain) {
            userid = domain.clone();
            let entity = self.entity.get(&domain).await?;
            domain = entity.domain;
        }

        let normalized = if domain == self.config.fqdn {
            if cdid::is_seems_cdid(id, 't') {
                format!("{id}@{domain}")
            } else {
                let target = self.semanticid.lookup(id, &userid).await?;
                format!("{target}@{domain}")
            }
        } else if cdid::is_seems_cdid(id, 't') {
            format!("{id}@{domain}")
        } else {
            format!("{id}@{userid}@{domain}")
        };

        self.repository.set_normalization_cache(timeline, &normalized);

        Ok(normalized)
    }

    /// Merged recent items across timelines: normalize, resolve chunk
    /// iterators, load bodies, then dedup by resource and sort newest
    /// first.
    pub async fn get_recent_items(
        &self,
        timelines: &[String],
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TimelineItem>> {
        let mut normalized = Vec::new();
        for timeline in timelines {
            match self.normalize_timeline_id(timeline).await {
                Ok(n) => normalized.push(n),
                Err(e) => warn!(timeline = timeline.as_str(), error = %e, "skipping unresolvable timeline"),
            }
        }

        let epoch = time_to_chunk(until);
        let itrs = self.repository.lookup_chunk_itrs(&normalized, &epoch).await;
        let chunks = self.repository.load_chunk_bodies(&itrs).await;

        Ok(merge_recent(chunks.values(), until, limit))
    }

    pub async fn get_recent_items_from_subscription(
        &self,
        subscription: &str,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TimelineItem>> {
        let sub = self.subscription.get_subscription(subscription).await?;
        let timelines: Vec<String> = sub.items.into_iter().map(|i| i.id).collect();
        self.get_recent_items(&timelines, until, limit).await
    }

    /// Chunk map for the batch read endpoint, keyed by the caller's
    /// original (pre-normalization) ids.
    pub async fn get_chunks(
        &self,
        timelines: &[String],
        until: DateTime<Utc>,
    ) -> Result<HashMap<String, Chunk>> {
        let mut normalized = Vec::new();
        let mut reverse = HashMap::new();
        for timeline in timelines {
            match self.normalize_timeline_id(timeline).await {
                Ok(n) => {
                    reverse.insert(n.clone(), timeline.clone());
                    normalized.push(n);
                }
                Err(e) => warn!(timeline = timeline.as_str(), error = %e, "skipping unresolvable timeline"),
            }
        }

        let epoch = time_to_chunk(until);
        let itrs = self.repository.lookup_chunk_itrs(&normalized, &epoch).await;
        let chunks = self.repository.load_chunk_bodies(&itrs).await;

        Ok(chunks
            .into_iter()
            .filter_map(|(normalized_id, chunk)| {
                reverse
                    .get(&normalized_id)
                    .map(|original| (original.clone(), chunk))
            })
            .collect())
    }

    /// Peer RPC surface: iterator resolution for timelines hosted here.
    pub async fn get_chunk_itrs(
        &self,
        timelines: &[String],
        epoch: &str,
    ) -> HashMap<String, String> {
        self.repository.lookup_chunk_itrs(timelines, epoch).await
    }

    /// Peer RPC surface: body loads for timelines hosted here.
    pub async fn get_chunk_bodies(
        &self,
        query: &HashMap<String, String>,
    ) -> HashMap<String, Chunk> {
        self.repository.load_chunk_bodies(query).await
    }

    /// The timeline-write gate: refuse non-local targets, evaluate
    /// `timeline.distribute`, then link the item.
    pub async fn post_item(&self, timeline: &str, item: TimelineItem) -> Result<TimelineItem> {
        let split: Vec<&str> = timeline.split('@').collect();
        if split.len() != 2 {
            return Err(ConcrntError::InvalidInput(format!(
                "invalid timeline reference: {timeline}"
            )));
        }

        let mut timeline_id = split[0].to_string();
        let mut timeline_host = split[1].to_string();

        if crypto::is_ccid(&timeline_host) {
            let owner = self.entity.get(&timeline_host).await?;
            timeline_host = owner.domain;
        }

        if !cdid::is_seems_cdid(&timeline_id, 't')
            && timeline_host == self.config.fqdn
            && crypto::is_ccid(split[1])
        {
            timeline_id = self.semanticid.lookup(&timeline_id, split[1]).await?;
        }

        if timeline_host != self.config.fqdn {
            return Err(ConcrntError::InvalidInput(format!(
                "timeline {timeline} is not hosted on this domain"
            )));
        }

        let item = TimelineItem {
            timeline_id: timeline_id.clone(),
            ..item
        };

        let author = item.author.clone().unwrap_or_else(|| item.owner.clone());

        let tl = self.get_timeline(timeline).await?;
        let requester = self.entity.get(&author).await.ok();

        let params = parse_params(tl.policy_params.as_deref());
        let result = self
            .policy
            .test_with_policy_url(
                &tl.policy,
                &RequestContext {
                    requester,
                    self_resource: serde_json::to_value(&tl).ok(),
                    params,
                    ..Default::default()
                },
                "timeline.distribute",
            )
            .await;

        if !self.policy.summarize(&[result], "timeline.distribute") {
            info!(
                principal = author.as_str(),
                timeline = timeline_id.as_str(),
                "audit: timeline.distribute denied"
            );
            return Err(ConcrntError::PermissionDenied(format!(
                "no timeline.distribute access to {timeline_id}"
            )));
        }

        debug!(resource = item.resource_id.as_str(), timeline = timeline_id.as_str(), "posting item");

        self.repository.create_item(item).await
    }

    pub async fn remove_items_by_resource_id(&self, resource_id: &str) -> Result<()> {
        self.repository.delete_item_by_resource_id(resource_id).await
    }

    /// Publish under the normalized channel name so local and peer
    /// subscribers agree on the channel.
    pub async fn publish_event(&self, mut event: Event) {
        if let Ok(normalized) = self.normalize_timeline_id(&event.timeline).await {
            event.timeline = normalized;
        }
        self.repository.publish_event(event);
    }

    /// Ingest an event document pushed by a peer and re-publish it on the
    /// local bus.
    pub async fn event(&self, document: &str, _signature: &str) -> Result<Event> {
        let doc: EventDocument = serde_json::from_str(document)?;
        let event = Event {
            timeline: doc.timeline,
            item: doc.item,
            resource: doc.resource,
            document: doc.document,
            signature: doc.signature,
        };
        self.repository.publish_event(event.clone());
        Ok(event)
    }

    /// Create or update a timeline from its signed document.
    pub async fn upsert_timeline(&self, document: &str, signature: &str) -> Result<Timeline> {
        let mut doc: TimelineDocument = serde_json::from_str(document)?;

        // an existing semantic id pins the timeline id; a dangling one is
        // cleaned up and re-bound below
        if !doc.base.semantic_id.is_empty() {
            if let Ok(existing_id) = self
                .semanticid
                .lookup(&doc.base.semantic_id, &doc.base.signer)
                .await
            {
                match self.repository.get_timeline(&existing_id).await {
                    Err(_) => {
                        self.semanticid
                            .delete(&doc.base.semantic_id, &doc.base.signer)
                            .await?;
                    }
                    Ok(_) => {
                        if doc.base.id.is_empty() {
                            doc.base.id = existing_id;
                        } else if doc.base.id != existing_id {
                            return Err(ConcrntError::InvalidInput(format!(
                                "semantic id mismatch: {} != {existing_id}",
                                doc.base.id
                            )));
                        }
                    }
                }
            }
        }

        let signer = self.entity.get(&doc.base.signer).await?;

        if doc.base.id.is_empty() {
            // create: the id is derived from the document hash, so the
            // same document can never occupy two ids
            let digest = crypto::keccak256(document.as_bytes());
            let mut hash10 = [0u8; 10];
            hash10.copy_from_slice(&digest[..10]);
            doc.base.id = Cdid::new(hash10, doc.base.signed_at).to_string();

            if self.repository.get_timeline(&doc.base.id).await.is_ok() {
                return Err(ConcrntError::AlreadyExists(format!(
                    "timeline {} already exists",
                    doc.base.id
                )));
            }

            let result = self
                .policy
                .test_with_policy_url(
                    "",
                    &RequestContext {
                        requester: Some(signer.clone()),
                        document: serde_json::from_str(document).ok(),
                        ..Default::default()
                    },
                    "timeline.create",
                )
                .await;
            if !self.policy.summarize(&[result], "timeline.create") {
                return Err(ConcrntError::PermissionDenied(
                    "no timeline.create access".into(),
                ));
            }
        } else {
            // update: only timelines hosted here may be rewritten
            let id = self.normalize_timeline_id(&doc.base.id).await?;
            let (head, domain) = id
                .rsplit_once('@')
                .ok_or_else(|| ConcrntError::InvalidInput(format!("bad timeline id: {id}")))?;
            if domain != self.config.fqdn {
                return Err(ConcrntError::InvalidInput(
                    "timeline is not owned by this domain".into(),
                ));
            }
            doc.base.id = head.to_string();

            let existing = self.repository.get_timeline(&doc.base.id).await?;

            // domainOwned is immutable after creation
            doc.domain_owned = existing.domain_owned;

            let params = parse_params(existing.policy_params.as_deref());
            let result = self
                .policy
                .test_with_policy_url(
                    &existing.policy,
                    &RequestContext {
                        requester: Some(signer.clone()),
                        self_resource: serde_json::to_value(&existing).ok(),
                        document: serde_json::from_str(document).ok(),
                        params,
                        ..Default::default()
                    },
                    "timeline.update",
                )
                .await;
            if !self.policy.summarize(&[result], "timeline.update") {
                return Err(ConcrntError::PermissionDenied(
                    "no timeline.update access".into(),
                ));
            }
        }

        let policy_params = if doc.base.policy_params.is_empty() {
            None
        } else {
            Some(doc.base.policy_params.clone())
        };

        let saved = self
            .repository
            .upsert_timeline(Timeline {
                id: doc.base.id.clone(),
                author: doc.base.signer.clone(),
                indexable: doc.indexable,
                domain_owned: doc.domain_owned,
                schema: doc.base.schema.clone(),
                policy: doc.base.policy.clone(),
                policy_params,
                document: document.to_string(),
                signature: signature.to_string(),
                cdate: Utc::now(),
                mdate: Utc::now(),
            })
            .await?;

        if !doc.base.semantic_id.is_empty() {
            self.semanticid
                .name(
                    &doc.base.semantic_id,
                    &doc.base.signer,
                    &saved.id,
                    document,
                    signature,
                )
                .await?;
        }

        Ok(Timeline {
            id: format!("{}@{}", saved.id, self.config.fqdn),
            ..saved
        })
    }

    /// Resolve a timeline known to this server (its own rows plus locally
    /// stored copies); does not reach out to peers.
    pub async fn get_timeline(&self, key: &str) -> Result<Timeline> {
        let split: Vec<&str> = key.split('@').collect();
        if split.len() < 2 {
            return self.repository.get_timeline(key).await;
        }

        let id = split[0];
        let domain = split[split.len() - 1];
        let userid = if split.len() == 3 { split[1] } else { domain };

        if domain == self.config.fqdn {
            return self.repository.get_timeline(id).await;
        }

        if cdid::is_seems_cdid(id, 't') {
            if let Ok(timeline) = self.repository.get_timeline(id).await {
                return Ok(timeline);
            }
        }
        let target = self.semanticid.lookup(id, userid).await?;
        self.repository.get_timeline(&target).await
    }

    /// Resolve a timeline wherever it lives, reaching across domains when
    /// the normalized id points at a peer.
    pub async fn get_timeline_auto_domain(&self, timeline_id: &str) -> Result<Timeline> {
        let normalized = self.normalize_timeline_id(timeline_id).await?;

        let (key, host) = match normalized.rsplit_once('@') {
            Some((key, host)) => (key.to_string(), host.to_string()),
            None => (normalized.clone(), self.config.fqdn.clone()),
        };

        if host == self.config.fqdn {
            self.repository.get_timeline(&key).await
        } else {
            self.repository.get_timeline_from_remote(&host, &key).await
        }
    }

    pub async fn list_timeline_by_schema(&self, schema: &str) -> Result<Vec<Timeline>> {
        let timelines = self.repository.list_timeline_by_schema(schema).await?;
        Ok(self.qualify(timelines))
    }

    pub async fn list_timeline_by_author(&self, author: &str) -> Result<Vec<Timeline>> {
        let timelines = self.repository.list_timeline_by_author(author).await?;
        Ok(self.qualify(timelines))
    }

    fn qualify(&self, timelines: Vec<Timeline>) -> Vec<Timeline> {
        timelines
            .into_iter()
            .map(|t| Timeline {
                id: format!("{}@{}", t.id, self.config.fqdn),
                ..t
            })
            .collect()
    }

    pub async fn get_item(&self, timeline: &str, resource_id: &str) -> Result<TimelineItem> {
        self.repository.get_item(timeline, resource_id).await
    }

    /// Remove a single item after `timeline.retract` clears. Returns the
    /// removed item and the principals whose views changed.
    pub async fn retract(
        &self,
        document: &str,
        _signature: &str,
    ) -> Result<(TimelineItem, Vec<String>)> {
        let doc: RetractDocument = serde_json::from_str(document)?;

        let existing = self.repository.get_item(&doc.timeline, &doc.target).await?;
        let signer = self.entity.get(&doc.base.signer).await?;
        let timeline = self.repository.get_timeline(&doc.timeline).await?;

        let params = parse_params(timeline.policy_params.as_deref());
        let result = self
            .policy
            .test_with_policy_url(
                &timeline.policy,
                &RequestContext {
                    requester: Some(signer),
                    self_resource: serde_json::to_value(&timeline).ok(),
                    resource: serde_json::to_value(&existing).ok(),
                    document: serde_json::from_str(document).ok(),
                    params,
                    ..Default::default()
                },
                "timeline.retract",
            )
            .await;
        if !self.policy.summarize(&[result], "timeline.retract") {
            return Err(ConcrntError::PermissionDenied(
                "no timeline.retract access".into(),
            ));
        }

        self.repository.delete_item(&doc.timeline, &doc.target).await?;

        let affected = if timeline.domain_owned {
            vec![self.config.fqdn.clone()]
        } else {
            vec![timeline.author]
        };

        Ok((existing, affected))
    }

    /// Delete a timeline once its `delete` document passes
    /// `timeline.delete`.
    pub async fn delete_timeline(&self, document: &str) -> Result<Timeline> {
        let doc: DeleteDocument = serde_json::from_str(document)?;

        let target = self.repository.get_timeline(&doc.target).await?;
        let signer = self.entity.get(&doc.base.signer).await?;

        let params = parse_params(target.policy_params.as_deref());
        let result = self
            .policy
            .test_with_policy_url(
                &target.policy,
                &RequestContext {
                    requester: Some(signer),
                    self_resource: serde_json::to_value(&target).ok(),
                    document: serde_json::from_str(document).ok(),
                    params,
                    ..Default::default()
                },
                "timeline.delete",
            )
            .await;
        if !self.policy.summarize(&[result], "timeline.delete") {
            return Err(ConcrntError::PermissionDenied(
                "no timeline.delete access".into(),
            ));
        }

        self.repository.delete_timeline(&doc.target).await?;

        Ok(target)
    }

    pub fn list_timeline_subscriptions(&self) -> HashMap<String, usize> {
        self.repository.list_timeline_subscriptions()
    }

    /// Principals responsible for the given timelines: the hosting domain
    /// for domain-owned ones, the author otherwise.
    pub async fn get_owners(&self, timelines: &[String]) -> Vec<String> {
        let mut owners = HashSet::new();
        for timeline_id in timelines {
            let Ok(timeline) = self.get_timeline(timeline_id).await else {
                continue;
            };
            if timeline.domain_owned {
                owners.insert(self.config.fqdn.clone());
            } else {
                owners.insert(timeline.author);
            }
        }
        owners.into_iter().collect()
    }

    /// Drop every user-owned timeline of a departing entity.
    pub async fn clean(&self, ccid: &str) -> Result<()> {
        let timelines = self.repository.list_timeline_by_author_owned(ccid).await?;
        for timeline in timelines {
            self.repository.delete_timeline(&timeline.id).await?;
        }
        Ok(())
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
        let normalized = self.normalize_timeline_id(timeline_id).await?;
        let (id, host) = normalized
            .rsplit_once('@')
            .ok_or_else(|| ConcrntError::InvalidInput(format!("bad timeline id: {normalized}")))?;
        if host != self.config.fqdn {
            return Err(ConcrntError::InvalidInput(
                "query on a remote timeline is not supported".into(),
            ));
        }
        self.repository
            .query(id, schema, owner, author, until, limit)
            .await
    }

    /// Long-lived pump for one realtime client.
    ///
    /// Each list arriving on `request` replaces the whole subscription:
    /// the previous forwarding task is cancelled, ids are normalized, and
    /// inbound events are rewritten to the id the client originally asked
    /// for before being pushed to `response`. Returns when the request
    /// stream closes.
    pub async fn realtime(
        &self,
        mut request: mpsc::Receiver<Vec<String>>,
        response: mpsc::Sender<Event>,
    ) {
        self.socket_counter.fetch_add(1, Ordering::Relaxed);

        let (events_tx, mut events_rx) = mpsc::channel::<Event>(1);
        let mut mapper: HashMap<String, String> = HashMap::new();
        let mut forward: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                requested = request.recv() => {
                    let Some(timelines) = requested else { break };

                    if let Some(task) = forward.take() {
                        task.abort();
                    }

                    let mut normalized = Vec::new();
                    mapper.clear();
                    for timeline in timelines {
                        match self.normalize_timeline_id(&timeline).await {
                            Ok(n) => {
                                mapper.insert(n.clone(), timeline);
                                normalized.push(n);
                            }
                            Err(e) => {
                                warn!(timeline = timeline.as_str(), error = %e, "failed to normalize timeline");
                            }
                        }
                    }

                    let repository = self.repository.clone();
                    let events_tx = events_tx.clone();
                    forward = Some(tokio::spawn(async move {
                        repository.subscribe(&normalized, events_tx).await;
                    }));
                }
                event = events_rx.recv() => {
                    let Some(mut event) = event else { break };
                    if let Some(original) = mapper.get(&event.timeline) {
                        event.timeline = original.clone();
                    }
                    if response.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(task) = forward.take() {
            task.abort();
        }
        self.socket_counter.fetch_sub(1, Ordering::Relaxed);
    }
}

fn parse_params(raw: Option<&str>) -> serde_json::Map<String, serde_json::Value> {
    raw.and_then(|r| serde_json::from_str(r).ok())
        .unwrap_or_default()
}

/// Merge chunk contents into one stream: drop items past `until`, dedup by
/// resource id, newest first, truncated to `limit`.
fn merge_recent<'a>(
    chunks: impl Iterator<Item = &'a Chunk>,
    until: DateTime<Utc>,
    limit: usize,
) -> Vec<TimelineItem> {
    let mut seen = HashSet::new();
    let mut merged: Vec<TimelineItem> = chunks
        .flat_map(|chunk| chunk.items.iter())
        .filter(|item| item.cdate <= until)
        .filter(|item| seen.insert(item.resource_id.clone()))
        .cloned()
        .collect();

    merged.sort_by(|a, b| b.cdate.cmp(&a.cdate));
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(timeline: &str, resource: &str, at: i64) -> TimelineItem {
        TimelineItem {
            timeline_id: timeline.to_string(),
            resource_id: resource.to_string(),
            owner: "con1owner".into(),
            author: None,
            schema: String::new(),
            cdate: Utc.timestamp_opt(at, 0).unwrap(),
        }
    }

    fn chunk(timeline: &str, items: Vec<TimelineItem>) -> Chunk {
        Chunk {
            key: format!("tl:body:{timeline}:e"),
            epoch: "e".into(),
            items,
        }
    }

    #[test]
    fn merge_sorts_newest_first_across_timelines() {
        let a = chunk(
            "ta@x.example",
            vec![item("ta@x.example", "m3", 300), item("ta@x.example", "m1", 100)],
        );
        let b = chunk(
            "tb@y.example",
            vec![item("tb@y.example", "m4", 400), item("tb@y.example", "m2", 200)],
        );
        let until = Utc.timestamp_opt(1_000, 0).unwrap();
        let merged = merge_recent([a, b].iter(), until, 10);
        let order: Vec<&str> = merged.iter().map(|i| i.resource_id.as_str()).collect();
        assert_eq!(order, vec!["m4", "m3", "m2", "m1"]);
    }

    #[test]
    fn merge_drops_items_past_until() {
        let c = chunk(
            "ta@x.example",
            vec![item("ta@x.example", "m2", 200), item("ta@x.example", "m1", 100)],
        );
        let until = Utc.timestamp_opt(150, 0).unwrap();
        let merged = merge_recent([c].iter(), until, 10);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].resource_id, "m1");
    }

    #[test]
    fn merge_dedups_by_resource_id() {
        // the same message fanned out to two timelines appears once
        let a = chunk("ta@x.example", vec![item("ta@x.example", "m1", 100)]);
        let b = chunk("tb@y.example", vec![item("tb@y.example", "m1", 100)]);
        let until = Utc.timestamp_opt(1_000, 0).unwrap();
        let merged = merge_recent([a, b].iter(), until, 10);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn merge_truncates_to_limit() {
        let items: Vec<TimelineItem> = (0..10)
            .map(|n| item("ta@x.example", &format!("m{n}"), 100 + n))
            .collect();
        let c = chunk("ta@x.example", items);
        let until = Utc.timestamp_opt(1_000, 0).unwrap();
        let merged = merge_recent([c].iter(), until, 3);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].resource_id, "m9");
    }
}
