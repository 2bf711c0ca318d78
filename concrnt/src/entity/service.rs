use chrono::Utc;
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::config::Args;
use crate::crypto;
use crate::document::{AffiliationDocument, AffiliationOption, TombstoneDocument};
use crate::jwt::{self, JwtService, SUBJECT_INVITE};
use crate::key::KeyService;
use crate::model::{
    Entity, EntityMeta, RequestContext, REGISTRATION_INVITE, REGISTRATION_OPEN,
};
use crate::policy::{PolicyEvalResult, PolicyService};
use crate::types::{ConcrntError, Result};

use super::repository::EntityRepository;

/// Entity admission and lookup. `affiliation` is the single gate through
/// which an identity becomes known to this domain, local or remote.
#[derive(Clone)]
pub struct EntityService {
    repository: EntityRepository,
    client: ApiClient,
    config: Args,
    key: KeyService,
    policy: PolicyService,
    jwt: JwtService,
    resolver: Arc<TokioAsyncResolver>,
}

impl EntityService {
    pub fn new(
        repository: EntityRepository,
        client: ApiClient,
        config: Args,
        key: KeyService,
        policy: PolicyService,
        jwt: JwtService,
    ) -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .unwrap_or_else(|_| {
                TokioAsyncResolver::tokio(Default::default(), Default::default())
            });
        Self {
            repository,
            client,
            config,
            key,
            policy,
            jwt,
            resolver: Arc::new(resolver),
        }
    }

    /// Admit or refresh an entity from a signed affiliation document.
    ///
    /// A stored affiliation with a newer `signedAt` wins: the call is
    /// idempotent and replaying an old document is a no-op returning the
    /// stored entity.
    pub async fn affiliation(
        &self,
        document: &str,
        signature: &str,
        option: Option<&str>,
        captcha_verified: bool,
    ) -> Result<Entity> {
        let doc: AffiliationDocument = serde_json::from_str(document)?;

        let existing = self.repository.get(&doc.base.signer).await.ok();
        if let Some(ref existing) = existing {
            if let Ok(stored) =
                serde_json::from_str::<AffiliationDocument>(&existing.affiliation_document)
            {
                if stored.base.signed_at > doc.base.signed_at {
                    return Ok(existing.clone());
                }
            }
        }

        if doc.domain == self.config.fqdn {
            self.local_affiliation(doc, document, signature, option, captcha_verified)
                .await
        } else {
            self.remote_affiliation(doc, document, signature, existing)
                .await
        }
    }

    async fn local_affiliation(
        &self,
        doc: AffiliationDocument,
        document: &str,
        signature: &str,
        option: Option<&str>,
        captcha_verified: bool,
    ) -> Result<Entity> {
        if self.config.site_key.is_some() && !captcha_verified {
            return Err(ConcrntError::PermissionDenied(
                "captcha verification failed".into(),
            ));
        }

        let opts: AffiliationOption = match option {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => AffiliationOption::default(),
        };

        let entity = Entity {
            id: doc.base.signer.clone(),
            domain: doc.domain.clone(),
            affiliation_document: document.to_string(),
            affiliation_signature: signature.to_string(),
            cdate: Utc::now(),
            mdate: Utc::now(),
            ..Default::default()
        };

        match self.config.registration.as_str() {
            REGISTRATION_OPEN => {
                let (created, _) = self
                    .repository
                    .upsert_with_meta(
                        entity,
                        EntityMeta {
                            id: doc.base.signer,
                            info: opts.info,
                            inviter: None,
                        },
                    )
                    .await?;
                Ok(created)
            }
            REGISTRATION_INVITE => {
                let invitation = opts.invitation.as_deref().ok_or_else(|| {
                    ConcrntError::InvalidInput("invitation code is required".into())
                })?;

                let claims = jwt::validate(invitation)?;
                if claims.subject != SUBJECT_INVITE {
                    return Err(ConcrntError::InvalidInput("invalid invitation code".into()));
                }
                if self.jwt.check_jti(&claims.jwt_id) {
                    return Err(ConcrntError::InvalidInput("invitation already used".into()));
                }

                let mut inviter_id = claims.issuer.clone();
                if crypto::is_ckid(&inviter_id) {
                    inviter_id = self.key.resolve_subkey(&inviter_id).await?;
                }

                if crypto::is_csid(&inviter_id) {
                    if inviter_id != self.config.csid {
                        return Err(ConcrntError::PermissionDenied(
                            "inviter is not allowed to invite".into(),
                        ));
                    }
                } else {
                    let inviter = self.repository.get(&inviter_id).await?;
                    let rctx = RequestContext {
                        requester: Some(inviter),
                        ..Default::default()
                    };
                    let result = self.policy.test_with_global_policy(&rctx, "invite");
                    if matches!(result, PolicyEvalResult::Never | PolicyEvalResult::Deny) {
                        return Err(ConcrntError::PermissionDenied(
                            "inviter is not allowed to invite".into(),
                        ));
                    }
                }

                let (registered, _) = self
                    .repository
                    .upsert_with_meta(
                        entity,
                        EntityMeta {
                            id: doc.base.signer,
                            info: opts.info,
                            inviter: Some(claims.issuer.clone()),
                        },
                    )
                    .await?;

                if let Some(expires_at) = claims.expiration() {
                    self.jwt.invalidate_jti(&claims.jwt_id, expires_at);
                }

                info!(
                    entity = registered.id.as_str(),
                    inviter = claims.issuer.as_str(),
                    "invited entity registered"
                );
                Ok(registered)
            }
            _ => Err(ConcrntError::PermissionDenied("registration is closed".into())),
        }
    }

    async fn remote_affiliation(
        &self,
        doc: AffiliationDocument,
        document: &str,
        signature: &str,
        existing: Option<Entity>,
    ) -> Result<Entity> {
        let mut entity = Entity {
            id: doc.base.signer,
            domain: doc.domain,
            affiliation_document: document.to_string(),
            affiliation_signature: signature.to_string(),
            cdate: Utc::now(),
            mdate: Utc::now(),
            ..Default::default()
        };

        // a re-affiliation must not reset locally maintained standing
        if let Some(existing) = existing {
            entity.tag = existing.tag;
            entity.score = existing.score;
            entity.is_score_fixed = existing.is_score_fixed;
        }

        self.repository.upsert(entity).await
    }

    /// Record a tombstone. The entity stays resolvable but is dead.
    pub async fn tombstone(&self, document: &str, signature: &str) -> Result<Entity> {
        let doc: TombstoneDocument = serde_json::from_str(document)?;
        self.repository
            .set_tombstone(&doc.base.signer, document, signature)
            .await?;
        self.repository.get(&doc.base.signer).await
    }

    pub async fn get(&self, ccid: &str) -> Result<Entity> {
        self.repository.get(ccid).await
    }

    /// Get, pulling from `hint` when the entity is unknown locally.
    pub async fn get_with_hint(&self, ccid: &str, hint: &str) -> Result<Entity> {
        if let Ok(entity) = self.repository.get(ccid).await {
            return Ok(entity);
        }
        if hint.is_empty() {
            return Err(ConcrntError::NotFound(format!(
                "entity {ccid} unknown and no hint supplied"
            )));
        }
        self.pull_entity_from_remote(ccid, hint).await
    }

    /// Resolve a DNS alias to an entity via `_concrnt.<alias>` TXT records
    /// carrying `ccid=`, `sig=` and optionally `hint=`. The signature must
    /// cover the alias string under the claimed ccid.
    pub async fn get_by_alias(&self, alias: &str) -> Result<Entity> {
        if let Ok(entity) = self.repository.get_by_alias(alias).await {
            return Ok(entity);
        }

        let records = self
            .resolver
            .txt_lookup(format!("_concrnt.{alias}."))
            .await
            .map_err(|e| ConcrntError::Upstream(format!("dns lookup failed: {e}")))?;

        let mut kv = HashMap::new();
        for record in records.iter() {
            let text = record.to_string();
            if let Some((key, value)) = text.split_once('=') {
                kv.insert(key.to_string(), value.to_string());
            }
        }

        let ccid = kv
            .get("ccid")
            .ok_or_else(|| ConcrntError::NotFound(format!("alias {alias}: no ccid record")))?
            .clone();
        let sig = kv
            .get("sig")
            .ok_or_else(|| ConcrntError::NotFound(format!("alias {alias}: no sig record")))?;

        crypto::verify_signature_hex(alias.as_bytes(), sig, &ccid)?;

        let entity = match self.repository.get(&ccid).await {
            Ok(entity) => entity,
            Err(_) => {
                let hint = kv.get("hint").cloned().unwrap_or_default();
                self.pull_entity_from_remote(&ccid, &hint).await?
            }
        };

        self.repository.set_alias(&ccid, alias).await?;
        Ok(Entity {
            alias: Some(alias.to_string()),
            ..entity
        })
    }

    /// Fetch an entity from its hosting domain, verify the affiliation is
    /// genuinely signed by the claimed id, then admit it.
    pub async fn pull_entity_from_remote(&self, ccid: &str, fqdn: &str) -> Result<Entity> {
        let entity = self.client.get_entity(fqdn, ccid).await?;

        crypto::verify_signature_hex(
            entity.affiliation_document.as_bytes(),
            &entity.affiliation_signature,
            ccid,
        )?;

        self.affiliation(
            &entity.affiliation_document,
            &entity.affiliation_signature,
            None,
            false,
        )
        .await
    }

    pub async fn list(&self) -> Result<Vec<Entity>> {
        self.repository.list().await
    }

    pub async fn is_user_exists(&self, ccid: &str) -> bool {
        self.repository.get(ccid).await.is_ok()
    }

    /// Refresh a remote entity's score unless it is pinned locally.
    pub async fn update_score(&self, ccid: &str, score: i32) -> Result<()> {
        let entity = self.repository.get(ccid).await?;
        if entity.is_score_fixed {
            warn!(entity = ccid, "score update ignored: score is fixed");
            return Ok(());
        }
        self.repository.update_score(ccid, score).await
    }

    pub async fn update_tag(&self, ccid: &str, tag: &str) -> Result<()> {
        self.repository.update_tag(ccid, tag).await
    }

    pub async fn delete(&self, ccid: &str) -> Result<()> {
        self.repository.delete(ccid).await
    }

    pub async fn clean(&self, ccid: &str) -> Result<()> {
        self.repository.delete_meta(ccid).await
    }

    pub async fn count(&self) -> Result<i64> {
        self.repository.count().await
    }

    pub async fn get_meta(&self, ccid: &str) -> Result<EntityMeta> {
        self.repository.get_meta(ccid).await
    }
}
