//! Ephemeral ECDSA P-256 session keys.
//!
//! The private scalar never leaves [`SessionKeypair`]; the only private
//! operation is signing. The public key is exported as a raw uncompressed
//! SEC1 point (65 bytes, `0x04 || x || y`), the same bytes WebCrypto's
//! `exportKey("raw", ...)` yields for a P-256 key.

use std::fmt;

use ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::HandshakeError;

/// Length of a raw uncompressed P-256 public key.
pub const RAW_PUBLIC_KEY_LENGTH: usize = 65;

/// Hex characters of the public key hash shown in logs.
const FINGERPRINT_LENGTH: usize = 16;

/// A freshly generated, sign-only P-256 keypair for one handshake attempt.
pub struct SessionKeypair {
    signing_key: SigningKey,
}

impl SessionKeypair {
    /// Generate a new session keypair from OS randomness.
    pub fn generate() -> Result<Self, HandshakeError> {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed)
            .map_err(|e| HandshakeError::GenerationFailed(e.to_string()))?;
        let result = SigningKey::from_slice(&seed);
        seed.zeroize();

        let signing_key =
            result.map_err(|e| HandshakeError::GenerationFailed(format!("P-256 scalar: {}", e)))?;
        Ok(Self { signing_key })
    }

    /// Raw uncompressed SEC1 encoding of the public key (65 bytes).
    pub fn public_key_raw(&self) -> Vec<u8> {
        self.verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign a message with ECDSA P-256 + SHA-256.
    ///
    /// Returns a 64-byte IEEE P1363 signature (r||s).
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let signature: Signature = self
            .signing_key
            .try_sign(message)
            .map_err(|e| HandshakeError::SigningFailed(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    /// Short hex digest of the public key, for log lines.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key_raw())
    }
}

impl fmt::Debug for SessionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeypair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Short hex digest of raw public key bytes.
pub fn fingerprint(public_key_raw: &[u8]) -> String {
    let digest = Sha256::digest(public_key_raw);
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LENGTH);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecdsa::signature::Verifier;

    fn verify(public_key_raw: &[u8], message: &[u8], signature_bytes: &[u8]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key_raw) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature_bytes) else {
            return false;
        };
        verifying_key.verify(message, &signature).is_ok()
    }

    #[test]
    fn raw_public_key_is_uncompressed_point() {
        let keypair = SessionKeypair::generate().unwrap();
        let raw = keypair.public_key_raw();
        assert_eq!(raw.len(), RAW_PUBLIC_KEY_LENGTH);
        assert_eq!(raw[0], 0x04);
    }

    #[test]
    fn keypairs_are_unique() {
        let a = SessionKeypair::generate().unwrap();
        let b = SessionKeypair::generate().unwrap();
        assert_ne!(a.public_key_raw(), b.public_key_raw());
    }

    #[test]
    fn raw_key_parses_back() {
        let keypair = SessionKeypair::generate().unwrap();
        let parsed = VerifyingKey::from_sec1_bytes(&keypair.public_key_raw()).unwrap();
        assert_eq!(&parsed, keypair.verifying_key());
    }

    #[test]
    fn sign_verify_round_trip() {
        let keypair = SessionKeypair::generate().unwrap();
        let signature = keypair.sign(b"delegate me").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify(&keypair.public_key_raw(), b"delegate me", &signature));
    }

    #[test]
    fn wrong_key_fails() {
        let signer = SessionKeypair::generate().unwrap();
        let other = SessionKeypair::generate().unwrap();
        let signature = signer.sign(b"hello").unwrap();
        assert!(!verify(&other.public_key_raw(), b"hello", &signature));
    }

    #[test]
    fn malformed_inputs_return_false() {
        let keypair = SessionKeypair::generate().unwrap();
        assert!(!verify(&[0u8; 10], b"x", &[0u8; 64]));
        assert!(!verify(&keypair.public_key_raw(), b"x", &[0u8; 3]));
    }

    #[test]
    fn debug_does_not_leak_scalar() {
        let keypair = SessionKeypair::generate().unwrap();
        let text = format!("{:?}", keypair);
        assert!(text.contains(&keypair.fingerprint()));
        assert!(!text.contains("signing_key"));
    }

    #[test]
    fn fingerprint_is_short_hex() {
        let keypair = SessionKeypair::generate().unwrap();
        let fp = keypair.fingerprint();
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, keypair.fingerprint());
    }
}
