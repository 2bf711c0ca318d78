//! Signature and address primitives
//!
//! Documents are signed with secp256k1 over the Keccak-256 digest of the
//! raw document bytes. Signatures travel hex-encoded, 65 bytes including
//! the recovery byte, so verification recovers the public key and compares
//! the derived address - no key distribution is needed for root keys.
//!
//! Addresses are bech32: the last 20 bytes of `keccak256(uncompressed
//! pubkey)` under an hrp that encodes the key role (`con` user root,
//! `cck` subkey, `ccs` domain signing key).

use bech32::{Bech32, Hrp};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

use crate::types::{ConcrntError, Result};

pub const HRP_CCID: &str = "con";
pub const HRP_CKID: &str = "cck";
pub const HRP_CSID: &str = "ccs";

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive the bech32 address of a public key under the given hrp.
pub fn pubkey_to_address(key: &VerifyingKey, hrp: &str) -> Result<String> {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let hrp = Hrp::parse(hrp).map_err(|e| ConcrntError::Internal(format!("bad hrp: {e}")))?;
    bech32::encode::<Bech32>(hrp, &digest[12..])
        .map_err(|e| ConcrntError::Internal(format!("bech32 encode: {e}")))
}

/// Parse a 32-byte hex private key into a signing key.
pub fn parse_private_key(hex_key: &str) -> Result<SigningKey> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| ConcrntError::InvalidInput(format!("bad private key hex: {e}")))?;
    SigningKey::from_slice(&bytes)
        .map_err(|e| ConcrntError::InvalidInput(format!("bad private key: {e}")))
}

/// Address of the key holder, as a CCID unless another hrp is requested.
pub fn private_key_to_address(key: &SigningKey, hrp: &str) -> Result<String> {
    pubkey_to_address(key.verifying_key(), hrp)
}

/// Sign `message`, returning the 65-byte r||s||v signature.
pub fn sign(message: &[u8], key: &SigningKey) -> Result<Vec<u8>> {
    let digest = keccak256(message);
    let (sig, recid) = key
        .sign_prehash_recoverable(&digest)
        .map_err(|e| ConcrntError::Internal(format!("signing failed: {e}")))?;
    let mut out = sig.to_bytes().to_vec();
    out.push(recid.to_byte());
    Ok(out)
}

/// Recover the signer's public key from a 65-byte signature.
pub fn recover_pubkey(message: &[u8], signature: &[u8]) -> Result<VerifyingKey> {
    if signature.len() != 65 {
        return Err(ConcrntError::InvalidInput(format!(
            "signature must be 65 bytes, got {}",
            signature.len()
        )));
    }
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| ConcrntError::InvalidInput(format!("bad signature: {e}")))?;
    // accept both raw (0/1) and offset (27/28) recovery bytes
    let v = signature[64];
    let v = if v >= 27 { v - 27 } else { v };
    let recid = RecoveryId::from_byte(v)
        .ok_or_else(|| ConcrntError::InvalidInput("bad recovery id".into()))?;
    let digest = keccak256(message);
    VerifyingKey::recover_from_prehash(&digest, &sig, recid)
        .map_err(|e| ConcrntError::InvalidInput(format!("key recovery failed: {e}")))
}

/// Verify that `signature` over `message` recovers to `address`.
/// The hrp of `address` selects the expected key role.
pub fn verify_signature(message: &[u8], signature: &[u8], address: &str) -> Result<()> {
    let hrp = address.get(..3).unwrap_or_default();
    if !matches!(hrp, HRP_CCID | HRP_CKID | HRP_CSID) {
        return Err(ConcrntError::InvalidInput(format!(
            "unknown address kind: {address}"
        )));
    }
    let recovered = recover_pubkey(message, signature)?;
    let derived = pubkey_to_address(&recovered, hrp)?;
    if derived != address {
        return Err(ConcrntError::InvalidInput(format!(
            "signature mismatch: signed by {derived}, expected {address}"
        )));
    }
    Ok(())
}

/// Hex transport variant of [`verify_signature`].
pub fn verify_signature_hex(message: &[u8], signature_hex: &str, address: &str) -> Result<()> {
    let sig = hex::decode(signature_hex)
        .map_err(|e| ConcrntError::InvalidInput(format!("bad signature hex: {e}")))?;
    verify_signature(message, &sig, address)
}

fn is_address(s: &str, hrp: &str) -> bool {
    if !s.starts_with(hrp) {
        return false;
    }
    match bech32::decode(s) {
        Ok((decoded_hrp, data)) => decoded_hrp.as_str() == hrp && data.len() == 20,
        Err(_) => false,
    }
}

pub fn is_ccid(s: &str) -> bool {
    is_address(s, HRP_CCID)
}

pub fn is_ckid(s: &str) -> bool {
    is_address(s, HRP_CKID)
}

pub fn is_csid(s: &str) -> bool {
    is_address(s, HRP_CSID)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SigningKey {
        parse_private_key("3fcfac6c211b743975de2d7b3f622c12694b8125daf4013562c5a1aefa3253a5")
            .unwrap()
    }

    #[test]
    fn sign_then_verify() {
        let key = test_key();
        let addr = private_key_to_address(&key, HRP_CCID).unwrap();
        let msg = br#"{"signer":"x","type":"message"}"#;
        let sig = sign(msg, &key).unwrap();
        assert_eq!(sig.len(), 65);
        verify_signature(msg, &sig, &addr).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_address() {
        let key = test_key();
        let other = parse_private_key(
            "1ca30329e8d35217b2328bacfc21c5e3d762713edab0252eead1f4c1ac0b4d81",
        )
        .unwrap();
        let other_addr = private_key_to_address(&other, HRP_CCID).unwrap();
        let msg = b"hello";
        let sig = sign(msg, &key).unwrap();
        assert!(verify_signature(msg, &sig, &other_addr).is_err());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let key = test_key();
        let addr = private_key_to_address(&key, HRP_CCID).unwrap();
        let sig = sign(b"original", &key).unwrap();
        assert!(verify_signature(b"tampered", &sig, &addr).is_err());
    }

    #[test]
    fn offset_recovery_byte_is_accepted() {
        let key = test_key();
        let addr = private_key_to_address(&key, HRP_CCID).unwrap();
        let msg = b"payload";
        let mut sig = sign(msg, &key).unwrap();
        sig[64] += 27;
        verify_signature(msg, &sig, &addr).unwrap();
    }

    #[test]
    fn address_shape() {
        let key = test_key();
        let addr = private_key_to_address(&key, HRP_CCID).unwrap();
        assert!(addr.starts_with("con1"));
        assert!(is_ccid(&addr));
        assert!(!is_ckid(&addr));
        let sub = private_key_to_address(&key, HRP_CKID).unwrap();
        assert!(is_ckid(&sub));
    }

    #[test]
    fn hex_signature_roundtrip() {
        let key = test_key();
        let addr = private_key_to_address(&key, HRP_CCID).unwrap();
        let msg = b"doc";
        let sig = hex::encode(sign(msg, &key).unwrap());
        verify_signature_hex(msg, &sig, &addr).unwrap();
    }
}
