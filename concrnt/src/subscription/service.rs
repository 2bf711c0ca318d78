use chrono::Utc;

use crate::cdid::Cdid;
use crate::crypto;
use crate::document::{SubscribeDocument, SubscriptionDocument, UnsubscribeDocument};
use crate::model::Subscription;
use crate::types::{ConcrntError, Result};

use super::repository::SubscriptionRepository;

#[derive(Clone)]
pub struct SubscriptionService {
    repository: SubscriptionRepository,
}

impl SubscriptionService {
    pub fn new(repository: SubscriptionRepository) -> Self {
        Self { repository }
    }

    /// Create or update a subscription from its signed document. The id is
    /// derived from the document hash on create; only the author may
    /// rewrite an existing subscription.
    pub async fn create_subscription(
        &self,
        document: &str,
        signature: &str,
    ) -> Result<Subscription> {
        let mut doc: SubscriptionDocument = serde_json::from_str(document)?;

        if doc.base.id.is_empty() {
            let digest = crypto::keccak256(document.as_bytes());
            let mut hash10 = [0u8; 10];
            hash10.copy_from_slice(&digest[..10]);
            doc.base.id = Cdid::new(hash10, doc.base.signed_at).to_string();
        } else if let Ok(existing) = self.repository.get(&doc.base.id).await {
            if existing.author != doc.base.signer {
                return Err(ConcrntError::PermissionDenied(
                    "only the author may update a subscription".into(),
                ));
            }
        }

        let policy_params = if doc.base.policy_params.is_empty() {
            None
        } else {
            Some(doc.base.policy_params.clone())
        };

        self.repository
            .upsert(Subscription {
                id: doc.base.id,
                author: doc.base.signer,
                indexable: doc.indexable,
                domain_owned: doc.domain_owned,
                schema: doc.base.schema,
                policy: doc.base.policy,
                policy_params,
                document: document.to_string(),
                signature: signature.to_string(),
                items: Vec::new(),
                cdate: Utc::now(),
                mdate: Utc::now(),
            })
            .await
    }

    pub async fn get_subscription(&self, id: &str) -> Result<Subscription> {
        self.repository.get(id).await
    }

    /// Add a timeline to a subscription. Only the subscription's author
    /// may grow it.
    pub async fn subscribe(&self, document: &str, _signature: &str) -> Result<Subscription> {
        let doc: SubscribeDocument = serde_json::from_str(document)?;

        let subscription = self.repository.get(&doc.subscription).await?;
        if subscription.author != doc.base.signer {
            return Err(ConcrntError::PermissionDenied(
                "only the author may modify a subscription".into(),
            ));
        }

        self.repository.add_item(&doc.subscription, &doc.target).await?;
        self.repository.get(&doc.subscription).await
    }

    pub async fn unsubscribe(&self, document: &str) -> Result<Subscription> {
        let doc: UnsubscribeDocument = serde_json::from_str(document)?;

        let subscription = self.repository.get(&doc.subscription).await?;
        if subscription.author != doc.base.signer {
            return Err(ConcrntError::PermissionDenied(
                "only the author may modify a subscription".into(),
            ));
        }

        self.repository
            .remove_item(&doc.subscription, &doc.target)
            .await?;
        self.repository.get(&doc.subscription).await
    }

    pub async fn get_own_subscriptions(&self, author: &str) -> Result<Vec<Subscription>> {
        self.repository.get_by_author(author).await
    }

    /// Delete a subscription; the `delete` document's signer must be the
    /// author.
    pub async fn delete_subscription(&self, document: &str) -> Result<Subscription> {
        let doc: crate::document::DeleteDocument = serde_json::from_str(document)?;

        let subscription = self.repository.get(&doc.target).await?;
        if subscription.author != doc.base.signer {
            return Err(ConcrntError::PermissionDenied(
                "only the author may delete a subscription".into(),
            ));
        }

        self.repository.delete(&doc.target).await?;
        Ok(subscription)
    }

    pub async fn clean(&self, ccid: &str) -> Result<()> {
        self.repository.clean(ccid).await
    }
}
