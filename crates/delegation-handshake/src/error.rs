use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Session keypair generation failed: {0}")]
    GenerationFailed(String),

    #[error("Identity provider popup was blocked by the browser")]
    PopupBlocked,

    #[error("Message from unexpected origin: expected {expected}, got {got}")]
    UnexpectedOrigin { expected: String, got: String },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unexpected message kind: {0}")]
    UnexpectedMessage(&'static str),

    #[error("Identity provider did not respond within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Identity provider window was closed before the handshake completed")]
    WindowClosed,

    #[error("Handshake was cancelled")]
    Cancelled,

    #[error("Message listener closed before the handshake completed")]
    ListenerClosed,

    #[error("Failed to register message listener: {0}")]
    ListenerFailed(String),

    #[error("Invalid handshake state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    #[error("Invalid handshake configuration: {0}")]
    InvalidConfig(String),

    #[error("postMessage to identity provider failed: {0}")]
    PostMessageFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Delegation chain is empty")]
    EmptyDelegationChain,

    #[error("Delegation is not bound to this session key")]
    DelegationKeyMismatch,

    #[error("Delegation expired at {expiration} (now {now})")]
    DelegationExpired { expiration: u64, now: u64 },
}

impl HandshakeError {
    /// Whether this error ends the attempt.
    ///
    /// Per-message rejections (foreign origin, undecodable data, wrong kind)
    /// are not fatal: the handshake keeps waiting for a valid message.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            HandshakeError::UnexpectedOrigin { .. }
                | HandshakeError::MalformedMessage(_)
                | HandshakeError::UnexpectedMessage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_rejections_are_not_fatal() {
        let foreign = HandshakeError::UnexpectedOrigin {
            expected: "https://identity.ic0.app".into(),
            got: "https://evil.example".into(),
        };
        assert!(!foreign.is_fatal());
        assert!(!HandshakeError::MalformedMessage("missing kind".into()).is_fatal());
        assert!(!HandshakeError::UnexpectedMessage("authorize-client-success").is_fatal());
    }

    #[test]
    fn aborts_are_fatal() {
        assert!(HandshakeError::PopupBlocked.is_fatal());
        assert!(HandshakeError::Cancelled.is_fatal());
        assert!(HandshakeError::HandshakeTimeout(Duration::from_secs(1)).is_fatal());
        assert!(HandshakeError::GenerationFailed("rng".into()).is_fatal());
    }

    #[test]
    fn origin_error_names_both_sides() {
        let err = HandshakeError::UnexpectedOrigin {
            expected: "https://identity.ic0.app".into(),
            got: "https://evil.example".into(),
        };
        let text = err.to_string();
        assert!(text.contains("https://identity.ic0.app"));
        assert!(text.contains("https://evil.example"));
    }
}
