//! `postMessage` payloads exchanged with the identity provider popup.
//!
//! Inbound: `{kind: "authorize-ready"}` and, once the user has signed in,
//! `{kind: "authorize-client-success", delegations, userPublicKey}`.
//! Outbound: `{kind: "authorize-client", sessionPublicKey}`.

use serde::{Deserialize, Serialize};

use crate::delegation::SignedDelegation;
use crate::error::HandshakeError;
use crate::origin::Origin;

/// Messages the provider window sends to the relying page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// The provider page has loaded and is listening.
    AuthorizeReady,

    /// The provider issued a delegation chain for the session key.
    #[serde(rename_all = "camelCase")]
    AuthorizeClientSuccess {
        delegations: Vec<SignedDelegation>,
        #[serde(with = "serde_bytes")]
        user_public_key: Vec<u8>,
    },
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::AuthorizeReady => "authorize-ready",
            InboundMessage::AuthorizeClientSuccess { .. } => "authorize-client-success",
        }
    }
}

/// Messages the relying page sends to the provider window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    AuthorizeClient {
        /// Raw uncompressed P-256 public key.
        #[serde(with = "serde_bytes")]
        session_public_key: Vec<u8>,
    },
}

/// A received cross-origin message, as reported by the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Serialized origin of the sender (`MessageEvent.origin`).
    pub origin: String,
    /// Structured-clone payload (`MessageEvent.data`).
    pub data: serde_json::Value,
}

impl InboundEvent {
    pub fn new(origin: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }

    /// Validate the sender origin, then decode the payload.
    ///
    /// The origin is checked before the payload is looked at, so nothing
    /// from a foreign window is ever parsed.
    pub fn decode(&self, expected: &Origin) -> Result<InboundMessage, HandshakeError> {
        if !expected.matches(&self.origin) {
            return Err(HandshakeError::UnexpectedOrigin {
                expected: expected.to_string(),
                got: self.origin.clone(),
            });
        }
        InboundMessage::deserialize(&self.data)
            .map_err(|e| HandshakeError::MalformedMessage(e.to_string()))
    }
}
