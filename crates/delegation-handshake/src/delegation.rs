//! Delegations issued by the identity provider for a session key.
//!
//! After the key exchange, the provider answers with a chain of signed
//! delegations ending in the session public key. The relying page checks
//! that the chain is bound to *its* key and still valid before using it.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::HandshakeError;
use crate::message::InboundMessage;

/// Authorization for `pubkey` to act on behalf of the signer until `expiration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    #[serde(with = "serde_bytes")]
    pub pubkey: Vec<u8>,
    /// Expiration in nanoseconds since the UNIX epoch.
    #[serde(deserialize_with = "deserialize_nanos")]
    pub expiration: u64,
    /// Optional restriction to a set of target principals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDelegation {
    pub delegation: Delegation,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// A delegation chain accepted for the current session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationChain {
    #[serde(with = "serde_bytes")]
    pub user_public_key: Vec<u8>,
    pub delegations: Vec<SignedDelegation>,
    /// Earliest expiration across the chain (ns since epoch).
    pub expiration: u64,
}

impl DelegationChain {
    /// Validate a provider reply against the session public key.
    ///
    /// The chain must be non-empty, end in `session_public_key`, and have no
    /// link expired at `now_ns`. Signature checks are left to the verifier
    /// that consumes the chain.
    pub fn accept(
        session_public_key: &[u8],
        message: InboundMessage,
        now_ns: u64,
    ) -> Result<Self, HandshakeError> {
        let (delegations, user_public_key) = match message {
            InboundMessage::AuthorizeClientSuccess {
                delegations,
                user_public_key,
            } => (delegations, user_public_key),
            other => return Err(HandshakeError::UnexpectedMessage(other.kind())),
        };

        let last = delegations
            .last()
            .ok_or(HandshakeError::EmptyDelegationChain)?;
        if last.delegation.pubkey != session_public_key {
            return Err(HandshakeError::DelegationKeyMismatch);
        }

        let mut expiration = u64::MAX;
        for signed in &delegations {
            if signed.delegation.expiration <= now_ns {
                return Err(HandshakeError::DelegationExpired {
                    expiration: signed.delegation.expiration,
                    now: now_ns,
                });
            }
            expiration = expiration.min(signed.delegation.expiration);
        }

        Ok(Self {
            user_public_key,
            delegations,
            expiration,
        })
    }
}

/// Accept nanosecond timestamps as JSON numbers or decimal strings.
///
/// Nanosecond timestamps exceed 2^53, so JS senders often stringify them.
fn deserialize_nanos<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct NanosVisitor;

    impl<'de> Visitor<'de> for NanosVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer or decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom("negative timestamp"))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<u64, E> {
            if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 {
                Ok(v as u64)
            } else {
                Err(E::custom("timestamp is not a non-negative integer"))
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(NanosVisitor)
}
