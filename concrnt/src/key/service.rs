use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::crypto;
use crate::document::{DocumentBase, EnactDocument, RevokeDocument};
use crate::model::Key;
use crate::types::{ConcrntError, Result};

use super::repository::KeyRepository;

/// Longest admissible subkey chain. Keys form a tree rooted at a CCID, so
/// any longer walk is a malformed graph, not a legitimate chain.
const MAX_CHAIN_DEPTH: usize = 8;

#[derive(Clone)]
pub struct KeyService {
    repository: KeyRepository,
}

impl KeyService {
    pub fn new(repository: KeyRepository) -> Self {
        Self { repository }
    }

    /// Admit a new subkey.
    ///
    /// The document must be signed by `parent` (directly, or with `parent`
    /// as its keyID), `parent` must be the root itself or a currently-valid
    /// subkey of the same root, and the new CKID must be unused.
    pub async fn enact(&self, document: &str, signature: &str) -> Result<Key> {
        let doc: EnactDocument = serde_json::from_str(document)?;

        if !crypto::is_ckid(&doc.target) {
            return Err(ConcrntError::InvalidInput(format!(
                "enact target must be a subkey id: {}",
                doc.target
            )));
        }
        if doc.base.signer != doc.root {
            return Err(ConcrntError::InvalidInput(
                "enact signer must be the key root".into(),
            ));
        }

        let signing_key = if doc.base.key_id.is_empty() {
            doc.base.signer.clone()
        } else {
            doc.base.key_id.clone()
        };
        if signing_key != doc.parent {
            return Err(ConcrntError::InvalidInput(
                "enact document must be signed by the parent key".into(),
            ));
        }

        if crypto::is_ccid(&doc.parent) {
            if doc.parent != doc.root {
                return Err(ConcrntError::InvalidInput(
                    "parent ccid must be the root".into(),
                ));
            }
        } else if crypto::is_ckid(&doc.parent) {
            let parent = self.repository.get(&doc.parent).await?;
            if parent.root != doc.root {
                return Err(ConcrntError::InvalidInput(
                    "parent key belongs to another root".into(),
                ));
            }
            if !is_valid_at(&parent, doc.base.signed_at) {
                return Err(ConcrntError::InvalidInput(
                    "parent key is not valid at signedAt".into(),
                ));
            }
        } else {
            return Err(ConcrntError::InvalidInput(format!(
                "parent must be a ccid or ckid: {}",
                doc.parent
            )));
        }

        if self.repository.get(&doc.target).await.is_ok() {
            return Err(ConcrntError::AlreadyExists(format!(
                "key {} already enacted",
                doc.target
            )));
        }

        crypto::verify_signature_hex(document.as_bytes(), signature, &signing_key)?;

        self.repository
            .enact(Key {
                id: doc.target,
                root: doc.root,
                parent: doc.parent,
                enact_document: document.to_string(),
                enact_signature: signature.to_string(),
                revoke_document: None,
                revoke_signature: None,
                valid_since: doc.base.signed_at,
                valid_until: None,
            })
            .await
    }

    /// Revoke a subkey. Revocation is monotonic: the key stops validating
    /// documents whose `signedAt` is past the revocation instant, forever.
    ///
    /// The revoker must be the root or a non-revoked ancestor of the target
    /// at `signedAt`.
    pub async fn revoke(&self, document: &str, signature: &str) -> Result<Key> {
        let doc: RevokeDocument = serde_json::from_str(document)?;

        let target = self.repository.get(&doc.target).await?;
        if target.valid_until.is_some() {
            return Err(ConcrntError::AlreadyExists(format!(
                "key {} is already revoked",
                doc.target
            )));
        }

        let signing_key = if doc.base.key_id.is_empty() {
            doc.base.signer.clone()
        } else {
            doc.base.key_id.clone()
        };

        if signing_key != target.root {
            let ancestors = self.chain_to_root(&target, doc.base.signed_at).await?;
            let authorized = ancestors.iter().any(|k| k.id == signing_key);
            if !authorized {
                return Err(ConcrntError::PermissionDenied(
                    "revoker is not an ancestor of the target key".into(),
                ));
            }
        }

        crypto::verify_signature_hex(document.as_bytes(), signature, &signing_key)?;

        self.repository
            .revoke(&doc.target, document, signature, doc.base.signed_at)
            .await
    }

    /// Root CCID owning a subkey.
    pub async fn resolve_subkey(&self, ckid: &str) -> Result<String> {
        Ok(self.repository.get(ckid).await?.root)
    }

    /// The chain from `ckid` up to (excluding) the root. The walk itself
    /// does not judge validity; callers check each link against the
    /// instant they care about.
    pub async fn get_key_resolution(&self, ckid: &str) -> Result<Vec<Key>> {
        let key = self.repository.get(ckid).await?;
        let mut chain = vec![key.clone()];
        let mut parent_id = key.parent.clone();
        for _ in 0..MAX_CHAIN_DEPTH {
            if parent_id == key.root {
                return Ok(chain);
            }
            let parent = self.repository.get(&parent_id).await?;
            if parent.root != key.root {
                return Err(ConcrntError::InvalidInput("key graph crosses roots".into()));
            }
            parent_id = parent.parent.clone();
            chain.push(parent);
        }
        Err(ConcrntError::InvalidInput("key chain too deep".into()))
    }

    pub async fn get_all(&self, root: &str) -> Result<Vec<Key>> {
        self.repository.get_all_by_root(root).await
    }

    pub async fn clean(&self, root: &str) -> Result<()> {
        self.repository.clean(root).await
    }

    /// Validate an externally-signed document against its signer,
    /// consulting `passport_keys` before the local graph so remote users
    /// validate without a storage round trip.
    pub async fn validate_document(
        &self,
        document: &str,
        signature: &str,
        passport_keys: &[Key],
    ) -> Result<()> {
        let base: DocumentBase<Value> = serde_json::from_str(document)?;

        if base.key_id.is_empty() {
            return crypto::verify_signature_hex(document.as_bytes(), signature, &base.signer)
                .map_err(|e| ConcrntError::Unauthorized(e.to_string()));
        }

        if !crypto::is_ckid(&base.key_id) {
            return Err(ConcrntError::Unauthorized(format!(
                "keyID must be a subkey id: {}",
                base.key_id
            )));
        }

        crypto::verify_signature_hex(document.as_bytes(), signature, &base.key_id)
            .map_err(|e| ConcrntError::Unauthorized(e.to_string()))?;

        let mut current_id = base.key_id.clone();
        for _ in 0..MAX_CHAIN_DEPTH {
            let key = self.lookup(&current_id, passport_keys).await?;

            if key.root != base.signer {
                return Err(ConcrntError::Unauthorized(format!(
                    "key {} does not belong to signer {}",
                    key.id, base.signer
                )));
            }
            if !is_valid_at(&key, base.signed_at) {
                return Err(ConcrntError::Unauthorized(format!(
                    "key {} is not valid at signedAt",
                    key.id
                )));
            }

            if key.parent == key.root {
                return Ok(());
            }
            current_id = key.parent.clone();
        }

        Err(ConcrntError::Unauthorized("key chain too deep".into()))
    }

    async fn lookup(&self, ckid: &str, passport_keys: &[Key]) -> Result<Key> {
        if let Some(key) = passport_keys.iter().find(|k| k.id == ckid) {
            return Ok(key.clone());
        }
        self.repository.get(ckid).await
    }

    /// Walk the parent links of `key` up to its root, requiring every hop
    /// to be valid at `at`.
    async fn chain_to_root(&self, key: &Key, at: DateTime<Utc>) -> Result<Vec<Key>> {
        let mut chain = Vec::new();
        let mut parent_id = key.parent.clone();
        for _ in 0..MAX_CHAIN_DEPTH {
            if parent_id == key.root {
                return Ok(chain);
            }
            let parent = self.repository.get(&parent_id).await?;
            if parent.root != key.root {
                return Err(ConcrntError::InvalidInput(
                    "key graph crosses roots".into(),
                ));
            }
            if !is_valid_at(&parent, at) {
                return Err(ConcrntError::Unauthorized(format!(
                    "ancestor key {} is not valid",
                    parent.id
                )));
            }
            parent_id = parent.parent.clone();
            chain.push(parent);
        }
        Err(ConcrntError::InvalidInput("key chain too deep".into()))
    }
}

/// A key validates documents signed within `[valid_since, valid_until)`.
pub fn is_valid_at(key: &Key, at: DateTime<Utc>) -> bool {
    if at < key.valid_since {
        return false;
    }
    match key.valid_until {
        Some(until) => at < until,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_with_window(since: i64, until: Option<i64>) -> Key {
        use chrono::TimeZone;
        Key {
            valid_since: Utc.timestamp_opt(since, 0).unwrap(),
            valid_until: until.map(|u| Utc.timestamp_opt(u, 0).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn validity_window_is_half_open() {
        use chrono::TimeZone;
        let key = key_with_window(100, Some(200));
        assert!(!is_valid_at(&key, Utc.timestamp_opt(99, 0).unwrap()));
        assert!(is_valid_at(&key, Utc.timestamp_opt(100, 0).unwrap()));
        assert!(is_valid_at(&key, Utc.timestamp_opt(199, 0).unwrap()));
        assert!(!is_valid_at(&key, Utc.timestamp_opt(200, 0).unwrap()));
    }

    #[test]
    fn unrevoked_key_is_open_ended() {
        use chrono::TimeZone;
        let key = key_with_window(100, None);
        assert!(is_valid_at(&key, Utc.timestamp_opt(1_000_000_000, 0).unwrap()));
    }
}
