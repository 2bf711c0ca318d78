//! Identity middleware - local JWTs and remote passports
//!
//! Two credentials authenticate a request:
//!
//! - `Authorization: Bearer <jwt>` - self-issued, signed with the caller's
//!   root key or a subkey. The audience must be this domain.
//! - `passport: <json>` - required when the caller's affiliation is
//!   remote. The hosting domain bundles the entity record and its keychain
//!   and signs the bundle, proving it vouches for the user at this instant
//!   without a per-request round trip to that domain.

use chrono::Utc;
use hyper::header::HeaderMap;
use k256::ecdsa::SigningKey;
use tracing::{debug, warn};

use crate::config::Args;
use crate::crypto;
use crate::document::{Passport, PassportDocument};
use crate::domain::DomainService;
use crate::entity::EntityService;
use crate::jwt::{self, Claims, SUBJECT_API};
use crate::key::{self, KeyService};
use crate::model::{Key, RequesterType};
use crate::types::{ConcrntError, Result};

/// Authenticated request context, carried explicitly through handlers.
#[derive(Debug, Clone)]
pub struct Principal {
    pub requester_type: RequesterType,
    /// CCID of the requesting user, or FQDN for domain requests
    pub requester_id: String,
    pub requester_tag: String,
    /// FQDN hosting the requester's affiliation
    pub requester_domain: String,
    /// Keys vouched for by the requester's passport
    pub keychain: Vec<Key>,
    pub captcha_verified: bool,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            requester_type: RequesterType::Anonymous,
            requester_id: String::new(),
            requester_tag: String::new(),
            requester_domain: String::new(),
            keychain: Vec::new(),
            captcha_verified: false,
        }
    }

    pub fn is_local_user(&self) -> bool {
        self.requester_type == RequesterType::LocalUser
    }
}

#[derive(Clone)]
pub struct AuthService {
    config: Args,
    entity: EntityService,
    domain: DomainService,
    key: KeyService,
    signing_key: SigningKey,
}

impl AuthService {
    pub fn new(
        config: Args,
        entity: EntityService,
        domain: DomainService,
        key: KeyService,
    ) -> Result<Self> {
        let signing_key = crypto::parse_private_key(&config.privatekey)?;
        Ok(Self {
            config,
            entity,
            domain,
            key,
            signing_key,
        })
    }

    /// Resolve the request headers to a principal. Absent credentials
    /// yield `Anonymous`; present-but-invalid credentials are an error so
    /// a forged token can never fall through to anonymous access.
    pub async fn identify(&self, headers: &HeaderMap) -> Result<Principal> {
        let mut principal = Principal::anonymous();

        // the captcha provider check happens in outer glue; it marks the
        // request and the core only reads the flag
        principal.captcha_verified = headers.contains_key("x-captcha-verified");

        let Some(token) = bearer_token(headers) else {
            return Ok(principal);
        };

        let claims = jwt::validate(&token)?;
        if claims.subject != SUBJECT_API {
            return Err(ConcrntError::Unauthorized(format!(
                "unexpected token subject: {}",
                claims.subject
            )));
        }
        if claims.audience != self.config.fqdn {
            return Err(ConcrntError::Unauthorized(format!(
                "token audience {} is not this domain",
                claims.audience
            )));
        }

        if crypto::is_csid(&claims.issuer) {
            let domain = self.domain.get(&claims.issuer).await?;
            principal.requester_type = if claims.issuer == self.config.csid {
                RequesterType::LocalDomain
            } else {
                RequesterType::RemoteDomain
            };
            principal.requester_id = domain.id.clone();
            principal.requester_domain = domain.id;
            return Ok(principal);
        }

        let requester_id = self.resolve_issuer(&claims).await?;

        let entity = self.entity.get(&requester_id).await;
        match entity {
            Ok(entity) if entity.domain == self.config.fqdn => {
                principal.requester_type = RequesterType::LocalUser;
                principal.requester_id = entity.id;
                principal.requester_tag = entity.tag;
                principal.requester_domain = entity.domain;
            }
            _ => {
                // remote (or locally unknown) user: the passport carries
                // the proof of affiliation
                self.apply_passport(headers, &requester_id, &mut principal)
                    .await?;
            }
        }

        Ok(principal)
    }

    /// Resolve the token issuer to a root CCID, honoring subkey validity
    /// at the token's issue time.
    async fn resolve_issuer(&self, claims: &Claims) -> Result<String> {
        if crypto::is_ccid(&claims.issuer) {
            return Ok(claims.issuer.clone());
        }
        if !crypto::is_ckid(&claims.issuer) {
            return Err(ConcrntError::Unauthorized(format!(
                "token issuer is not a known key kind: {}",
                claims.issuer
            )));
        }

        let subkey = self.key.get_key_resolution(&claims.issuer).await?;
        let issued_at = claims.issued_at_time().unwrap_or_else(Utc::now);
        for link in &subkey {
            if !key::is_valid_at(link, issued_at) {
                return Err(ConcrntError::Unauthorized(format!(
                    "issuer subkey {} was not valid at iat",
                    link.id
                )));
            }
        }
        subkey
            .first()
            .map(|k| k.root.clone())
            .ok_or_else(|| ConcrntError::Unauthorized("unresolvable issuer subkey".into()))
    }

    async fn apply_passport(
        &self,
        headers: &HeaderMap,
        requester_id: &str,
        principal: &mut Principal,
    ) -> Result<()> {
        let raw = headers
            .get("passport")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ConcrntError::Unauthorized("remote requester without passport".into())
            })?;

        let passport: Passport = serde_json::from_str(raw)
            .map_err(|e| ConcrntError::Unauthorized(format!("malformed passport: {e}")))?;
        let doc: PassportDocument = serde_json::from_str(&passport.document)
            .map_err(|e| ConcrntError::Unauthorized(format!("malformed passport document: {e}")))?;

        if doc.entity.id != requester_id {
            return Err(ConcrntError::Unauthorized(
                "passport entity does not match requester".into(),
            ));
        }

        // the issuing domain must be known, in our dimension, and must
        // have signed this passport
        let issuing_domain = self.domain.get_by_fqdn(&doc.domain).await?;
        crypto::verify_signature_hex(
            passport.document.as_bytes(),
            &passport.signature,
            &issuing_domain.csid,
        )
        .map_err(|e| ConcrntError::Unauthorized(format!("passport signature invalid: {e}")))?;

        // record what the peer vouched for
        let known = self.entity.get(requester_id).await;
        let known = match known {
            Ok(entity) => entity,
            Err(_) => {
                debug!(entity = requester_id, "registering remote entity from passport");
                self.entity
                    .affiliation(
                        &doc.entity.affiliation_document,
                        &doc.entity.affiliation_signature,
                        None,
                        false,
                    )
                    .await?
            }
        };

        if known.score != doc.entity.score {
            if let Err(e) = self.entity.update_score(requester_id, doc.entity.score).await {
                warn!(entity = requester_id, error = %e, "score refresh failed");
            }
        }

        principal.requester_type = RequesterType::RemoteUser;
        principal.requester_id = requester_id.to_string();
        principal.requester_tag = known.tag;
        principal.requester_domain = doc.domain;
        principal.keychain = doc.keys;
        Ok(())
    }

    /// Issue a passport for a local user: this domain's attestation of the
    /// entity and its keychain, presentable at peers.
    pub async fn issue_passport(&self, requester: &str, keys: Vec<Key>) -> Result<Passport> {
        let entity = self.entity.get(requester).await?;
        if entity.domain != self.config.fqdn {
            return Err(ConcrntError::PermissionDenied(
                "passports are issued to local users only".into(),
            ));
        }

        let document = PassportDocument {
            domain: self.config.fqdn.clone(),
            entity,
            keys,
            signed_at: Utc::now(),
        };
        let document = serde_json::to_string(&document)
            .map_err(|e| ConcrntError::Internal(e.to_string()))?;
        let signature = hex::encode(crypto::sign(document.as_bytes(), &self.signing_key)?);

        Ok(Passport {
            document,
            signature,
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));

        let mut bare = HeaderMap::new();
        bare.insert("authorization", HeaderValue::from_static("abc"));
        assert!(bearer_token(&bare).is_none());
        assert!(bearer_token(&HeaderMap::new()).is_none());
    }

    #[test]
    fn anonymous_principal_shape() {
        let p = Principal::anonymous();
        assert_eq!(p.requester_type, RequesterType::Anonymous);
        assert!(p.keychain.is_empty());
        assert!(!p.is_local_user());
    }
}
