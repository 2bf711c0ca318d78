//! Shared records exchanged between services, storage and peers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration policy of this domain
pub const REGISTRATION_OPEN: &str = "open";
pub const REGISTRATION_INVITE: &str = "invite";
pub const REGISTRATION_CLOSE: &str = "close";

/// How the requester was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequesterType {
    Anonymous,
    LocalUser,
    RemoteUser,
    LocalDomain,
    RemoteDomain,
}

/// User entity observed by this domain.
///
/// The binding between `id` and `domain` is the signed affiliation
/// document, not an account row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "ccid")]
    pub id: String,
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
    pub cdate: DateTime<Utc>,
    pub mdate: DateTime<Utc>,
}

/// Local-only entity bookkeeping, never exposed to peers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityMeta {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inviter: Option<String>,
}

/// Subkey in an entity's key tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Key {
    pub id: String,
    pub root: String,
    pub parent: String,
    pub enact_document: String,
    pub enact_signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_signature: Option<String>,
    pub valid_since: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

/// Append-only stream of timeline items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub indexable: bool,
    #[serde(default)]
    pub domain_owned: bool,
    pub schema: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_params: Option<String>,
    pub document: String,
    pub signature: String,
    pub cdate: DateTime<Utc>,
    pub mdate: DateTime<Utc>,
}

/// One resource linked into one timeline. Unique on
/// `(timeline_id, resource_id)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineItem {
    #[serde(rename = "timelineID")]
    pub timeline_id: String,
    #[serde(rename = "resourceID")]
    pub resource_id: String,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub schema: String,
    pub cdate: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub author: String,
    pub schema: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_params: Option<String>,
    pub document: String,
    pub signature: String,
    pub timelines: Vec<String>,
    pub cdate: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Association {
    pub id: String,
    pub author: String,
    pub owner: String,
    pub schema: String,
    pub variant: String,
    pub target: String,
    pub document: String,
    pub signature: String,
    #[serde(default)]
    pub timelines: Vec<String>,
    pub cdate: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub author: String,
    pub schema: String,
    pub document: String,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_id: Option<String>,
    pub cdate: DateTime<Utc>,
    pub mdate: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub indexable: bool,
    #[serde(default)]
    pub domain_owned: bool,
    pub schema: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_params: Option<String>,
    pub document: String,
    pub signature: String,
    #[serde(default)]
    pub items: Vec<SubscriptionItem>,
    pub cdate: DateTime<Utc>,
    pub mdate: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionItem {
    pub id: String,
    pub subscription: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {
    pub from: String,
    pub to: String,
    pub document: String,
    pub signature: String,
}

/// Peer domain in the same dimension.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Domain {
    #[serde(rename = "fqdn")]
    pub id: String,
    pub ccid: String,
    pub csid: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub score: i32,
    pub dimension: String,
    pub cdate: DateTime<Utc>,
    pub mdate: DateTime<Utc>,
}

/// Realtime packet broadcast on the channel named by the fully-qualified
/// timeline id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    pub timeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<TimelineItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<serde_json::Value>,
    pub document: String,
    pub signature: String,
}

/// One epoch of one timeline as served to peers and clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chunk {
    pub key: String,
    pub epoch: String,
    pub items: Vec<TimelineItem>,
}

/// Subscription update frame exchanged on realtime sockets, by clients and
/// by peer domains alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub channels: Vec<String>,
}

/// Commit request body.
#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    pub document: String,
    pub signature: String,
    #[serde(default)]
    pub option: Option<String>,
}

/// Uniform JSON envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBase<T> {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ResponseBase<T> {
    pub fn ok(content: T) -> Self {
        Self {
            status: "ok".into(),
            content: Some(content),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            content: None,
            error: Some(message.into()),
        }
    }
}

/// Context a policy statement is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub requester: Option<Entity>,
    pub requester_domain: Option<Domain>,
    pub self_resource: Option<serde_json::Value>,
    pub resource: Option<serde_json::Value>,
    pub document: Option<serde_json::Value>,
    pub params: serde_json::Map<String, serde_json::Value>,
}
