use serde_json::Value;
use tracing::{info, warn};

use crate::cdid::Cdid;
use crate::crypto;
use crate::document::{DeleteDocument, MessageDocument};
use crate::model::{Event, Message, RequestContext, TimelineItem};
use crate::policy::PolicyService;
use crate::timeline::TimelineService;
use crate::types::{ConcrntError, Result};

use super::repository::MessageRepository;

#[derive(Clone)]
pub struct MessageService {
    repository: MessageRepository,
    timeline: TimelineService,
    policy: PolicyService,
}

impl MessageService {
    pub fn new(
        repository: MessageRepository,
        timeline: TimelineService,
        policy: PolicyService,
    ) -> Self {
        Self {
            repository,
            timeline,
            policy,
        }
    }

    /// Store a message and fan it out to every timeline its document
    /// lists. A timeline that refuses the item (policy, remote host, slow
    /// peer) is skipped; the message itself stays committed.
    pub async fn create(&self, document: &str, signature: &str) -> Result<Message> {
        let doc: MessageDocument = serde_json::from_str(document)?;

        let id = if doc.base.id.is_empty() {
            let digest = crypto::keccak256(document.as_bytes());
            let mut hash10 = [0u8; 10];
            hash10.copy_from_slice(&digest[..10]);
            Cdid::new(hash10, doc.base.signed_at).to_string()
        } else {
            doc.base.id.clone()
        };

        let policy_params = if doc.base.policy_params.is_empty() {
            None
        } else {
            Some(doc.base.policy_params.clone())
        };

        let message = self
            .repository
            .create(Message {
                id,
                author: doc.base.signer.clone(),
                schema: doc.base.schema.clone(),
                policy: doc.base.policy.clone(),
                policy_params,
                document: document.to_string(),
                signature: signature.to_string(),
                timelines: doc.timelines.clone(),
                cdate: doc.base.signed_at,
            })
            .await?;

        let resource = serde_json::to_value(&message).ok();
        for timeline in &doc.timelines {
            let item = TimelineItem {
                timeline_id: timeline.clone(),
                resource_id: message.id.clone(),
                owner: doc.base.signer.clone(),
                author: None,
                schema: doc.base.schema.clone(),
                cdate: doc.base.signed_at,
            };
            match self.timeline.post_item(timeline, item).await {
                Ok(created) => {
                    self.timeline
                        .publish_event(Event {
                            timeline: timeline.clone(),
                            item: Some(created),
                            resource: resource.clone(),
                            document: document.to_string(),
                            signature: signature.to_string(),
                        })
                        .await;
                }
                Err(e) => {
                    // remote timelines are posted by their own domain;
                    // local refusals are policy working as intended
                    warn!(timeline = timeline.as_str(), error = %e, "message fan-out skipped");
                }
            }
        }

        Ok(message)
    }

    pub async fn get(&self, id: &str) -> Result<Message> {
        self.repository.get(id).await
    }

    /// Delete a message. Allowed for the author, or whoever the message's
    /// own policy grants `message.delete`.
    pub async fn delete(&self, document: &str, signature: &str) -> Result<Message> {
        let doc: DeleteDocument = serde_json::from_str(document)?;

        let message = self.repository.get(&doc.target).await?;

        if message.author != doc.base.signer {
            let ctx = RequestContext {
                requester: Some(crate::model::Entity {
                    id: doc.base.signer.clone(),
                    ..Default::default()
                }),
                self_resource: serde_json::to_value(&message).ok(),
                document: serde_json::from_str::<Value>(document).ok(),
                ..Default::default()
            };
            let result = self
                .policy
                .test_with_policy_url(&message.policy, &ctx, "message.delete")
                .await;
            if !self.policy.summarize(&[result], "message.delete") {
                return Err(ConcrntError::PermissionDenied(format!(
                    "{} may not delete message {}",
                    doc.base.signer, message.id
                )));
            }
        }

        self.repository.delete(&message.id).await?;
        self.timeline.remove_items_by_resource_id(&message.id).await?;

        for timeline in &message.timelines {
            self.timeline
                .publish_event(Event {
                    timeline: timeline.clone(),
                    item: None,
                    resource: serde_json::to_value(&message).ok(),
                    document: document.to_string(),
                    signature: signature.to_string(),
                })
                .await;
        }

        info!(message = message.id.as_str(), signer = doc.base.signer.as_str(), "message deleted");
        Ok(message)
    }

    /// Remove every message a departing entity authored.
    pub async fn clean(&self, ccid: &str) -> Result<()> {
        let removed = self.repository.clean(ccid).await?;
        info!(author = ccid, removed = removed, "messages cleaned");
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        self.repository.count().await
    }
}
