//! Challenge-response identity verification.
//!
//! Clients are identified by an ECDSA P-256 public key (SPKI DER, base64 on
//! the wire). Authentication is a 3-step exchange: the server issues 32
//! random challenge bytes, the client signs their SHA-256 digest, and the
//! server verifies the IEEE P1363 (fixed-size `r || s`) signature.

use base64::Engine;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::error::{AppError, AppResult};

/// Challenge length in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// Generate fresh challenge bytes for one auth exchange.
pub fn generate_challenge() -> [u8; CHALLENGE_LEN] {
    let mut bytes = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Decode a base64 SPKI public key, rejecting anything that is not a valid
/// P-256 point. Returns the canonical base64 form used as the identity key
/// in the users table.
pub fn canonical_public_key(public_key_b64: &str) -> AppResult<String> {
    let der = base64::engine::general_purpose::STANDARD
        .decode(public_key_b64.trim())
        .map_err(|_| AppError::Auth("Public key is not valid base64".into()))?;

    VerifyingKey::from_public_key_der(&der)
        .map_err(|_| AppError::Auth("Public key is not a valid P-256 SPKI key".into()))?;

    Ok(base64::engine::general_purpose::STANDARD.encode(der))
}

/// Verify a hex-encoded P1363 signature over the challenge bytes.
pub fn verify_signature(
    public_key_b64: &str,
    challenge: &[u8],
    signature_hex: &str,
) -> AppResult<()> {
    let der = base64::engine::general_purpose::STANDARD
        .decode(public_key_b64.trim())
        .map_err(|_| AppError::Auth("Public key is not valid base64".into()))?;
    let key = VerifyingKey::from_public_key_der(&der)
        .map_err(|_| AppError::Auth("Public key is not a valid P-256 SPKI key".into()))?;

    let sig_bytes = hex::decode(signature_hex.trim())
        .map_err(|_| AppError::Auth("Signature is not valid hex".into()))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|_| AppError::Auth("Signature is not a valid P1363 encoding".into()))?;

    key.verify(challenge, &signature)
        .map_err(|_| AppError::Auth("Signature verification failed".into()))
}

/// Constant-time admin key comparison.
pub fn admin_key_matches(configured: &str, submitted: &str) -> bool {
    configured.as_bytes().ct_eq(submitted.as_bytes()).into()
}

/// Strip the IPv4-mapped-IPv6 prefix so ban rules match the same client
/// regardless of socket family.
pub fn normalize_ip(addr: std::net::IpAddr) -> String {
    match addr {
        std::net::IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        std::net::IpAddr::V4(v4) => v4.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;
    use p256::pkcs8::EncodePublicKey;

    fn test_keypair() -> (SigningKey, String) {
        let signing = SigningKey::random(&mut rand::thread_rng());
        let spki = signing
            .verifying_key()
            .to_public_key_der()
            .expect("SPKI encoding");
        let b64 = base64::engine::general_purpose::STANDARD.encode(spki.as_bytes());
        (signing, b64)
    }

    #[test]
    fn valid_signature_verifies() {
        let (signing, public_key) = test_keypair();
        let challenge = generate_challenge();
        let signature: Signature = signing.sign(&challenge);
        let signature_hex = hex::encode(signature.to_bytes());

        assert!(verify_signature(&public_key, &challenge, &signature_hex).is_ok());
    }

    #[test]
    fn signature_over_wrong_challenge_fails() {
        let (signing, public_key) = test_keypair();
        let challenge = generate_challenge();
        let other = generate_challenge();
        let signature: Signature = signing.sign(&other);
        let signature_hex = hex::encode(signature.to_bytes());

        assert!(verify_signature(&public_key, &challenge, &signature_hex).is_err());
    }

    #[test]
    fn signature_from_different_key_fails() {
        let (_, public_key) = test_keypair();
        let (other_signing, _) = test_keypair();
        let challenge = generate_challenge();
        let signature: Signature = other_signing.sign(&challenge);
        let signature_hex = hex::encode(signature.to_bytes());

        assert!(verify_signature(&public_key, &challenge, &signature_hex).is_err());
    }

    #[test]
    fn garbage_public_key_is_rejected() {
        assert!(canonical_public_key("not base64!!!").is_err());
        let b64 = base64::engine::general_purpose::STANDARD.encode(b"not a key");
        assert!(canonical_public_key(&b64).is_err());
    }

    #[test]
    fn canonical_key_round_trips() {
        let (_, public_key) = test_keypair();
        let canonical = canonical_public_key(&public_key).unwrap();
        assert_eq!(canonical, public_key);
    }

    #[test]
    fn admin_key_comparison() {
        assert!(admin_key_matches("secret", "secret"));
        assert!(!admin_key_matches("secret", "Secret"));
        assert!(!admin_key_matches("secret", "secret2"));
    }

    #[test]
    fn ipv4_mapped_prefix_is_stripped() {
        let mapped: std::net::IpAddr = "::ffff:203.0.113.7".parse().unwrap();
        assert_eq!(normalize_ip(mapped), "203.0.113.7");

        let plain: std::net::IpAddr = "203.0.113.7".parse().unwrap();
        assert_eq!(normalize_ip(plain), "203.0.113.7");

        let v6: std::net::IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(normalize_ip(v6), "2001:db8::1");
    }
}
