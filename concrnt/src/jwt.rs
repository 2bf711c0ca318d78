//! Compact JWTs signed with recoverable secp256k1
//!
//! Local users self-issue tokens with their root or subkey; domains issue
//! invite codes and peer tokens with their signing key. The algorithm tag
//! is `CONCRNT`: the signature is the same 65-byte recoverable form used
//! for documents, over `b64(header).b64(payload)`, so validation recovers
//! the issuer address instead of looking up a verification key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use chunk_cache_core::CacheStore;

use crate::crypto;
use crate::types::{ConcrntError, Result};

const ALG: &str = "CONCRNT";

/// Subject of invitation tokens consumed by `entity::affiliation`.
pub const SUBJECT_INVITE: &str = "CONCRNT_INVITE";
/// Subject of API tokens accepted by the identity middleware.
pub const SUBJECT_API: &str = "concrnt";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// All claim values travel as strings, timestamps as unix seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "iss", default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,
    #[serde(rename = "sub", default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    #[serde(rename = "aud", default, skip_serializing_if = "String::is_empty")]
    pub audience: String,
    #[serde(rename = "exp", default, skip_serializing_if = "String::is_empty")]
    pub expiration_time: String,
    #[serde(rename = "iat", default, skip_serializing_if = "String::is_empty")]
    pub issued_at: String,
    #[serde(rename = "jti", default, skip_serializing_if = "String::is_empty")]
    pub jwt_id: String,
}

impl Claims {
    pub fn issued_at_time(&self) -> Option<DateTime<Utc>> {
        let unix: i64 = self.issued_at.parse().ok()?;
        Utc.timestamp_opt(unix, 0).single()
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        let unix: i64 = self.expiration_time.parse().ok()?;
        Utc.timestamp_opt(unix, 0).single()
    }
}

/// Create a signed token.
pub fn create(claims: &Claims, key: &SigningKey) -> Result<String> {
    let header = Header {
        alg: ALG.into(),
        typ: "JWT".into(),
    };
    let head = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{head}.{payload}");
    let signature = crypto::sign(signing_input.as_bytes(), key)?;
    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Validate signature shape, algorithm and expiry; returns the claims.
///
/// The recovered signer address must equal the `iss` claim when `iss` is a
/// root address; subkey issuers are resolved by the caller against the key
/// graph, so here the signature only has to recover to the issuer string
/// under its own hrp.
pub fn validate(token: &str) -> Result<Claims> {
    let mut parts = token.split('.');
    let (head, payload, sig) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) => (h, p, s),
        _ => return Err(ConcrntError::Unauthorized("malformed token".into())),
    };

    let header: Header = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(head)
            .map_err(|_| ConcrntError::Unauthorized("bad token header".into()))?,
    )
    .map_err(|_| ConcrntError::Unauthorized("bad token header".into()))?;
    if header.alg != ALG {
        return Err(ConcrntError::Unauthorized(format!(
            "unsupported alg: {}",
            header.alg
        )));
    }

    let claims: Claims = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| ConcrntError::Unauthorized("bad token payload".into()))?,
    )
    .map_err(|_| ConcrntError::Unauthorized("bad token payload".into()))?;

    let signature = URL_SAFE_NO_PAD
        .decode(sig)
        .map_err(|_| ConcrntError::Unauthorized("bad token signature".into()))?;

    let signing_input = format!("{head}.{payload}");
    crypto::verify_signature(signing_input.as_bytes(), &signature, &claims.issuer)
        .map_err(|e| ConcrntError::Unauthorized(format!("token signature invalid: {e}")))?;

    if let Some(exp) = claims.expiration() {
        if exp < Utc::now() {
            return Err(ConcrntError::Unauthorized("token expired".into()));
        }
    }

    Ok(claims)
}

/// Tracks consumed token ids so an invite can only be redeemed once.
/// Entries expire with the token itself.
#[derive(Clone)]
pub struct JwtService {
    cache: Arc<CacheStore>,
}

const JTI_PREFIX: &str = "jwt:jti:";

impl JwtService {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self { cache }
    }

    /// True when the jti has already been consumed.
    pub fn check_jti(&self, jti: &str) -> bool {
        self.cache.get(&format!("{JTI_PREFIX}{jti}")).is_some()
    }

    /// Consume a jti until `expires_at`.
    pub fn invalidate_jti(&self, jti: &str, expires_at: DateTime<Utc>) {
        let ttl = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(0));
        self.cache
            .set_with_ttl(&format!("{JTI_PREFIX}{jti}"), b"used".to_vec(), ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SigningKey {
        crypto::parse_private_key(
            "3fcfac6c211b743975de2d7b3f622c12694b8125daf4013562c5a1aefa3253a5",
        )
        .unwrap()
    }

    fn issuer() -> String {
        crypto::private_key_to_address(&key(), crypto::HRP_CCID).unwrap()
    }

    #[test]
    fn create_then_validate() {
        let claims = Claims {
            issuer: issuer(),
            subject: SUBJECT_API.into(),
            audience: "local.example.com".into(),
            ..Default::default()
        };
        let token = create(&claims, &key()).unwrap();
        let validated = validate(&token).unwrap();
        assert_eq!(validated.issuer, claims.issuer);
        assert_eq!(validated.subject, "concrnt");
    }

    #[test]
    fn expired_token_rejected() {
        let claims = Claims {
            issuer: issuer(),
            subject: SUBJECT_API.into(),
            expiration_time: "1000000".into(),
            ..Default::default()
        };
        let token = create(&claims, &key()).unwrap();
        assert!(matches!(
            validate(&token),
            Err(ConcrntError::Unauthorized(_))
        ));
    }

    #[test]
    fn tampered_payload_rejected() {
        let claims = Claims {
            issuer: issuer(),
            subject: SUBJECT_API.into(),
            ..Default::default()
        };
        let token = create(&claims, &key()).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                issuer: issuer(),
                subject: "CONCRNT_INVITE".into(),
                ..Default::default()
            })
            .unwrap(),
        );
        parts[1] = &forged;
        let forged_token = parts.join(".");
        assert!(validate(&forged_token).is_err());
    }

    #[test]
    fn jti_consumed_once() {
        let svc = JwtService::new(Arc::new(CacheStore::new()));
        assert!(!svc.check_jti("abc"));
        svc.invalidate_jti("abc", Utc::now() + chrono::Duration::hours(1));
        assert!(svc.check_jti("abc"));
    }
}
