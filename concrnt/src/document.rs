//! Signed document envelopes
//!
//! The canonical field order of the envelope is `id, signer, owner, type,
//! schema, policy, policyParams, keyID, body, meta, semanticID, signedAt`.
//! The bytes hashed and signed are the document exactly as received; no
//! layer of this server re-serializes a document before verification, so
//! these types only ever appear on the *parse* side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Entity, Key, TimelineItem};

/// Document types accepted by the commit dispatcher.
pub mod doc_type {
    pub const MESSAGE: &str = "message";
    pub const ASSOCIATION: &str = "association";
    pub const PROFILE: &str = "profile";
    pub const AFFILIATION: &str = "affiliation";
    pub const TOMBSTONE: &str = "tombstone";
    pub const TIMELINE: &str = "timeline";
    pub const RETRACT: &str = "retract";
    pub const ACK: &str = "ack";
    pub const UNACK: &str = "unack";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const ENACT: &str = "enact";
    pub const REVOKE: &str = "revoke";
    pub const DELETE: &str = "delete";
    pub const EVENT: &str = "event";
}

/// Common head of every signed document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentBase<T> {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub signer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy: String,
    #[serde(
        rename = "policyParams",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub policy_params: String,
    #[serde(rename = "keyID", default, skip_serializing_if = "String::is_empty")]
    pub key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(
        rename = "semanticID",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub semantic_id: String,
    #[serde(rename = "signedAt")]
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AffiliationDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    pub domain: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TombstoneDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    pub timelines: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssociationDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    #[serde(default)]
    pub timelines: Vec<String>,
    pub variant: String,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    #[serde(default)]
    pub indexable: bool,
    #[serde(rename = "domainOwned", default)]
    pub domain_owned: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetractDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    pub timeline: String,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    #[serde(default)]
    pub indexable: bool,
    #[serde(rename = "domainOwned", default)]
    pub domain_owned: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    pub subscription: String,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsubscribeDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    pub subscription: String,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AckDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnactDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    pub target: String,
    pub root: String,
    pub parent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    pub target: String,
}

/// A domain's attestation about one of its users: the entity record and
/// its keychain, signed by the domain signing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passport {
    pub document: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassportDocument {
    pub domain: String,
    pub entity: Entity,
    #[serde(default)]
    pub keys: Vec<Key>,
    #[serde(rename = "signedAt")]
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventDocument {
    #[serde(flatten)]
    pub base: DocumentBase<Value>,
    pub timeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<TimelineItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    pub document: String,
    pub signature: String,
}

/// Option payload accepted alongside an affiliation commit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AffiliationOption {
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub invitation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_parses_canonical_envelope() {
        let raw = r#"{
            "signer": "con1xxxx",
            "type": "message",
            "schema": "https://schema.example/message/0.json",
            "keyID": "cck1yyyy",
            "body": {"content": "hello"},
            "signedAt": "2024-01-01T00:00:00Z"
        }"#;
        let base: DocumentBase<Value> = serde_json::from_str(raw).unwrap();
        assert_eq!(base.doc_type, "message");
        assert_eq!(base.signer, "con1xxxx");
        assert_eq!(base.key_id, "cck1yyyy");
        assert!(base.id.is_empty());
    }

    #[test]
    fn typed_document_carries_extra_fields() {
        let raw = r#"{
            "signer": "con1xxxx",
            "type": "message",
            "schema": "s",
            "timelines": ["tabc@example.com"],
            "signedAt": "2024-01-01T00:00:00Z"
        }"#;
        let doc: MessageDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.timelines, vec!["tabc@example.com"]);
    }
}
