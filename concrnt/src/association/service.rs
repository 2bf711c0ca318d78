use tracing::warn;

use crate::cdid::Cdid;
use crate::crypto;
use crate::document::{AssociationDocument, DeleteDocument};
use crate::message::MessageService;
use crate::model::{Association, Event, TimelineItem};
use crate::timeline::TimelineService;
use crate::types::{ConcrntError, Result};

use super::repository::AssociationRepository;

#[derive(Clone)]
pub struct AssociationService {
    repository: AssociationRepository,
    timeline: TimelineService,
    message: MessageService,
}

impl AssociationService {
    pub fn new(
        repository: AssociationRepository,
        timeline: TimelineService,
        message: MessageService,
    ) -> Self {
        Self {
            repository,
            timeline,
            message,
        }
    }

    /// Attach an association to its target resource and fan it out: items
    /// go to the timelines the document lists, events also reach the
    /// timelines of the target message so its readers see the reaction.
    pub async fn create(&self, document: &str, signature: &str) -> Result<Association> {
        let doc: AssociationDocument = serde_json::from_str(document)?;

        let (owner, target_timelines) = match doc.target.chars().next() {
            Some('m') => {
                let message = self.message.get(&doc.target).await?;
                (message.author.clone(), message.timelines)
            }
            Some('t') => {
                let timeline = self.timeline.get_timeline(&doc.target).await?;
                (timeline.author.clone(), Vec::new())
            }
            _ => {
                return Err(ConcrntError::InvalidInput(format!(
                    "association target must be a message or timeline: {}",
                    doc.target
                )))
            }
        };

        let id = if doc.base.id.is_empty() {
            let digest = crypto::keccak256(document.as_bytes());
            let mut hash10 = [0u8; 10];
            hash10.copy_from_slice(&digest[..10]);
            Cdid::new(hash10, doc.base.signed_at).to_string()
        } else {
            doc.base.id.clone()
        };

        let association = self
            .repository
            .create(Association {
                id,
                author: doc.base.signer.clone(),
                owner,
                schema: doc.base.schema.clone(),
                variant: doc.variant.clone(),
                target: doc.target.clone(),
                document: document.to_string(),
                signature: signature.to_string(),
                timelines: doc.timelines.clone(),
                cdate: doc.base.signed_at,
            })
            .await?;

        let resource = serde_json::to_value(&association).ok();

        for timeline in &doc.timelines {
            let item = TimelineItem {
                timeline_id: timeline.clone(),
                resource_id: association.id.clone(),
                owner: association.owner.clone(),
                author: Some(association.author.clone()),
                schema: association.schema.clone(),
                cdate: association.cdate,
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
                    warn!(timeline = timeline.as_str(), error = %e, "association fan-out skipped");
                }
            }
        }

        // readers of the target see the reaction arrive live
        for timeline in &target_timelines {
            self.timeline
                .publish_event(Event {
                    timeline: timeline.clone(),
                    item: None,
                    resource: resource.clone(),
                    document: document.to_string(),
                    signature: signature.to_string(),
                })
                .await;
        }

        Ok(association)
    }

    pub async fn get(&self, id: &str) -> Result<Association> {
        self.repository.get(id).await
    }

    pub async fn get_by_target(&self, target: &str) -> Result<Vec<Association>> {
        self.repository.get_by_target(target).await
    }

    pub async fn get_own_by_target(
        &self,
        author: &str,
        target: &str,
    ) -> Result<Vec<Association>> {
        self.repository.get_own_by_target(author, target).await
    }

    pub async fn count_by_target(&self, target: &str) -> Result<i64> {
        self.repository.count_by_target(target).await
    }

    /// Delete an association. The author and the owner of the target may
    /// both remove it.
    pub async fn delete(&self, document: &str, signature: &str) -> Result<Association> {
        let doc: DeleteDocument = serde_json::from_str(document)?;

        let association = self.repository.get(&doc.target).await?;
        if association.author != doc.base.signer && association.owner != doc.base.signer {
            return Err(ConcrntError::PermissionDenied(format!(
                "{} may not delete association {}",
                doc.base.signer, association.id
            )));
        }

        self.repository.delete(&association.id).await?;
        self.timeline
            .remove_items_by_resource_id(&association.id)
            .await?;

        // notify readers of the target resource
        if association.target.starts_with('m') {
            if let Ok(message) = self.message.get(&association.target).await {
                for timeline in &message.timelines {
                    self.timeline
                        .publish_event(Event {
                            timeline: timeline.clone(),
                            item: None,
                            resource: serde_json::to_value(&association).ok(),
                            document: document.to_string(),
                            signature: signature.to_string(),
                        })
                        .await;
                }
            }
        }

        Ok(association)
    }

    pub async fn clean(&self, ccid: &str) -> Result<()> {
        self.repository.clean(ccid).await?;
        Ok(())
    }
}
