//! Commit dispatcher
//!
//! The single path through which externally-signed documents become state.
//! Every commit is verified against the signer's key graph (with passport
//! keys consulted first) before being routed to its service by document
//! type.

use serde_json::Value;
use tracing::{debug, info};

use crate::ack::AckService;
use crate::association::AssociationService;
use crate::auth::Principal;
use crate::document::{doc_type, DeleteDocument, DocumentBase};
use crate::entity::EntityService;
use crate::key::KeyService;
use crate::message::MessageService;
use crate::profile::ProfileService;
use crate::subscription::SubscriptionService;
use crate::timeline::TimelineService;
use crate::types::{ConcrntError, Result};

#[derive(Clone)]
pub struct StoreService {
    key: KeyService,
    entity: EntityService,
    message: MessageService,
    association: AssociationService,
    profile: ProfileService,
    timeline: TimelineService,
    ack: AckService,
    subscription: SubscriptionService,
}

impl StoreService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: KeyService,
        entity: EntityService,
        message: MessageService,
        association: AssociationService,
        profile: ProfileService,
        timeline: TimelineService,
        ack: AckService,
        subscription: SubscriptionService,
    ) -> Self {
        Self {
            key,
            entity,
            message,
            association,
            profile,
            timeline,
            ack,
            subscription,
        }
    }

    /// Verify and apply one signed document. Returns the created or
    /// updated resource as JSON.
    pub async fn commit(
        &self,
        document: &str,
        signature: &str,
        option: Option<&str>,
        principal: &Principal,
    ) -> Result<Value> {
        let base: DocumentBase<Value> = serde_json::from_str(document)?;

        self.key
            .validate_document(document, signature, &principal.keychain)
            .await?;

        debug!(
            doc_type = base.doc_type.as_str(),
            signer = base.signer.as_str(),
            "commit accepted for dispatch"
        );

        match base.doc_type.as_str() {
            doc_type::MESSAGE => to_value(self.message.create(document, signature).await?),
            doc_type::ASSOCIATION => {
                to_value(self.association.create(document, signature).await?)
            }
            doc_type::PROFILE => to_value(self.profile.upsert(document, signature).await?),
            doc_type::AFFILIATION => to_value(
                self.entity
                    .affiliation(document, signature, option, principal.captcha_verified)
                    .await?,
            ),
            doc_type::TOMBSTONE => {
                let entity = self.entity.tombstone(document, signature).await?;
                self.scrub_entity(&entity.id).await;
                to_value(entity)
            }
            doc_type::TIMELINE => {
                to_value(self.timeline.upsert_timeline(document, signature).await?)
            }
            doc_type::RETRACT => {
                let (item, _affected) = self.timeline.retract(document, signature).await?;
                to_value(item)
            }
            doc_type::EVENT => to_value(self.timeline.event(document, signature).await?),
            doc_type::ACK | doc_type::UNACK => {
                self.ack.ack(document, signature).await?;
                Ok(Value::Null)
            }
            doc_type::SUBSCRIPTION => to_value(
                self.subscription
                    .create_subscription(document, signature)
                    .await?,
            ),
            doc_type::SUBSCRIBE => {
                to_value(self.subscription.subscribe(document, signature).await?)
            }
            doc_type::UNSUBSCRIBE => to_value(self.subscription.unsubscribe(document).await?),
            doc_type::ENACT => to_value(self.key.enact(document, signature).await?),
            doc_type::REVOKE => to_value(self.key.revoke(document, signature).await?),
            doc_type::DELETE => {
                let doc: DeleteDocument = serde_json::from_str(document)?;
                info!(delete_target = doc.target.as_str(), signer = base.signer.as_str(), "delete committed");
                match doc.target.chars().next() {
                    Some('m') => to_value(self.message.delete(document, signature).await?),
                    Some('a') => to_value(self.association.delete(document, signature).await?),
                    Some('p') => to_value(self.profile.delete(document).await?),
                    Some('t') => to_value(self.timeline.delete_timeline(document).await?),
                    Some('s') => {
                        to_value(self.subscription.delete_subscription(document).await?)
                    }
                    other => Err(ConcrntError::InvalidInput(format!(
                        "unknown delete target type: {other:?}"
                    ))),
                }
            }
            other => Err(ConcrntError::InvalidInput(format!(
                "unknown document type: {other}"
            ))),
        }
    }
}

impl StoreService {
    /// Drop the user-owned data of a tombstoned entity. The entity row
    /// itself stays resolvable (tombstoned, not erased) and the key graph
    /// is kept so old revocations remain checkable.
    async fn scrub_entity(&self, ccid: &str) {
        for (what, result) in [
            ("messages", self.message.clean(ccid).await),
            ("associations", self.association.clean(ccid).await),
            ("profiles", self.profile.clean(ccid).await),
            ("timelines", self.timeline.clean(ccid).await),
            ("subscriptions", self.subscription.clean(ccid).await),
            ("acks", self.ack.clean(ccid).await),
            ("entity meta", self.entity.clean(ccid).await),
        ] {
            if let Err(e) = result {
                tracing::warn!(entity = ccid, what = what, error = %e, "tombstone scrub step failed");
            }
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ConcrntError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_document_routes_by_target_prefix() {
        let raw = r#"{
            "signer": "con1x",
            "type": "delete",
            "target": "m0123456789abcdefghjkmnpqr",
            "signedAt": "2024-01-01T00:00:00Z"
        }"#;
        let doc: DeleteDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.base.doc_type, doc_type::DELETE);
        assert_eq!(doc.target.chars().next(), Some('m'));
    }
}
