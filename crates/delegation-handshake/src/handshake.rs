//! Initiator state machine.
//!
//! `Idle → KeypairRequested → WaitingForReady → KeyExchanged`, with
//! `Aborted` reachable from every non-terminal state. A [`Handshake`] owns
//! everything one attempt needs: the session keypair and, once the popup is
//! open, the [`PendingHandshake`] record.

use crate::delegation::DelegationChain;
use crate::error::HandshakeError;
use crate::keypair::SessionKeypair;
use crate::message::{InboundEvent, InboundMessage, OutboundMessage};
use crate::origin::Origin;
use crate::transport::ProviderWindow;

/// Why an attempt was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    GenerationFailed,
    PopupBlocked,
    ListenerFailed,
    ListenerClosed,
    Timeout,
    WindowClosed,
    Cancelled,
    PostMessageFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    KeypairRequested,
    WaitingForReady,
    KeyExchanged,
    Aborted(AbortReason),
}

impl HandshakeState {
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeState::Idle => "idle",
            HandshakeState::KeypairRequested => "keypair-requested",
            HandshakeState::WaitingForReady => "waiting-for-ready",
            HandshakeState::KeyExchanged => "key-exchanged",
            HandshakeState::Aborted(_) => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::KeyExchanged | HandshakeState::Aborted(_))
    }
}

/// State held between window-open and key exchange.
pub struct PendingHandshake<W> {
    pub keypair: SessionKeypair,
    pub window: W,
    pub expected_origin: Origin,
}

/// Result of feeding one inbound event to the handshake.
#[derive(Debug)]
pub enum MessageOutcome {
    /// `authorize-ready` arrived and the public key was posted.
    KeyExchanged,
    /// The event was rejected; the handshake keeps waiting.
    Ignored(HandshakeError),
}

pub struct Handshake<W: ProviderWindow> {
    state: HandshakeState,
    provider_origin: Origin,
    keypair: Option<SessionKeypair>,
    pending: Option<PendingHandshake<W>>,
}

impl<W: ProviderWindow> Handshake<W> {
    pub fn new(provider_origin: Origin) -> Self {
        Self {
            state: HandshakeState::Idle,
            provider_origin,
            keypair: None,
            pending: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn provider_origin(&self) -> &Origin {
        &self.provider_origin
    }

    /// Generate the sign-only session keypair.
    pub fn generate_keypair(&mut self) -> Result<(), HandshakeError> {
        self.expect_state(HandshakeState::Idle, "generate keypair")?;
        self.state = HandshakeState::KeypairRequested;

        match SessionKeypair::generate() {
            Ok(keypair) => {
                tracing::debug!(fingerprint = %keypair.fingerprint(), "generated session keypair");
                self.keypair = Some(keypair);
                Ok(())
            }
            Err(e) => {
                self.abort(AbortReason::GenerationFailed);
                Err(e)
            }
        }
    }

    /// Take ownership of the opened provider window and start waiting.
    pub fn attach_window(&mut self, window: W) -> Result<(), HandshakeError> {
        self.expect_state(HandshakeState::KeypairRequested, "attach window")?;
        let keypair = self.keypair.take().ok_or(HandshakeError::InvalidState {
            operation: "attach window",
            state: "keypair-missing",
        })?;

        self.pending = Some(PendingHandshake {
            keypair,
            window,
            expected_origin: self.provider_origin.clone(),
        });
        self.state = HandshakeState::WaitingForReady;
        Ok(())
    }

    /// Handle one inbound event.
    ///
    /// Foreign origins, undecodable payloads and anything other than
    /// `authorize-ready` are logged and ignored without a state change.
    pub fn on_message(&mut self, event: &InboundEvent) -> Result<MessageOutcome, HandshakeError> {
        self.expect_state(HandshakeState::WaitingForReady, "handle message")?;

        let decoded = match &self.pending {
            Some(pending) => event.decode(&pending.expected_origin),
            None => return Err(self.missing_pending("handle message")),
        };

        let rejection = match decoded {
            Ok(InboundMessage::AuthorizeReady) => {
                self.send_public_key()?;
                return Ok(MessageOutcome::KeyExchanged);
            }
            Ok(other) => HandshakeError::UnexpectedMessage(other.kind()),
            Err(e) => e,
        };

        tracing::warn!(origin = %event.origin, error = %rejection, "ignoring message");
        Ok(MessageOutcome::Ignored(rejection))
    }

    /// Post `authorize-client` with the raw session public key to the
    /// provider window, pinned to the provider origin.
    pub fn send_public_key(&mut self) -> Result<(), HandshakeError> {
        self.expect_state(HandshakeState::WaitingForReady, "send public key")?;
        let Some(pending) = &self.pending else {
            return Err(self.missing_pending("send public key"));
        };

        let message = OutboundMessage::AuthorizeClient {
            session_public_key: pending.keypair.public_key_raw(),
        };
        let posted = pending
            .window
            .post_message(&message, &pending.expected_origin);
        let fingerprint = pending.keypair.fingerprint();
        let target = pending.expected_origin.to_string();

        if let Err(e) = posted {
            self.abort(AbortReason::PostMessageFailed);
            return Err(e);
        }

        tracing::info!(%fingerprint, %target, "sent session public key");
        self.state = HandshakeState::KeyExchanged;
        Ok(())
    }

    /// Abort the attempt, closing the popup if it is still open.
    ///
    /// No-op once the handshake is terminal.
    pub fn abort(&mut self, reason: AbortReason) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(pending) = self.pending.take() {
            if !pending.window.is_closed() {
                pending.window.close();
            }
        }
        self.keypair = None;
        self.state = HandshakeState::Aborted(reason);
        tracing::warn!(?reason, "handshake aborted");
    }

    /// Whether the user closed the provider window.
    pub fn window_closed(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| pending.window.is_closed())
    }

    /// Finish a successful attempt.
    ///
    /// The provider window is released but left open so the user can sign in.
    pub fn into_completed(mut self) -> Result<CompletedHandshake, HandshakeError> {
        self.expect_state(HandshakeState::KeyExchanged, "complete")?;
        let pending = self
            .pending
            .take()
            .ok_or_else(|| self.missing_pending("complete"))?;

        Ok(CompletedHandshake {
            session_public_key: pending.keypair.public_key_raw(),
            keypair: pending.keypair,
            provider_origin: pending.expected_origin,
        })
    }

    fn expect_state(
        &self,
        expected: HandshakeState,
        operation: &'static str,
    ) -> Result<(), HandshakeError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HandshakeError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    fn missing_pending(&self, operation: &'static str) -> HandshakeError {
        HandshakeError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}

impl<W: ProviderWindow> Drop for Handshake<W> {
    fn drop(&mut self) {
        self.abort(AbortReason::Cancelled);
    }
}

/// A handshake whose public key reached the provider.
#[derive(Debug)]
pub struct CompletedHandshake {
    keypair: SessionKeypair,
    session_public_key: Vec<u8>,
    provider_origin: Origin,
}

impl CompletedHandshake {
    pub fn keypair(&self) -> &SessionKeypair {
        &self.keypair
    }

    /// The raw public key that was sent.
    pub fn session_public_key(&self) -> &[u8] {
        &self.session_public_key
    }

    pub fn provider_origin(&self) -> &Origin {
        &self.provider_origin
    }

    /// Validate the provider's `authorize-client-success` reply.
    pub fn accept_delegation(
        &self,
        event: &InboundEvent,
        now_ns: u64,
    ) -> Result<DelegationChain, HandshakeError> {
        let message = event.decode(&self.provider_origin)?;
        DelegationChain::accept(&self.session_public_key, message, now_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryProvider, MemoryWindow};
    use crate::transport::WindowOpener;
    use serde_json::json;

    const PROVIDER: &str = "https://identity.ic0.app";

    fn waiting() -> (MemoryProvider, Handshake<MemoryWindow>) {
        let origin = Origin::parse(PROVIDER).unwrap();
        let provider = MemoryProvider::new(origin.clone());
        let mut handshake = Handshake::new(origin);
        handshake.generate_keypair().unwrap();
        let window = provider
            .open(&url::Url::parse("https://identity.ic0.app/#authorize").unwrap())
            .unwrap();
        handshake.attach_window(window).unwrap();
        (provider, handshake)
    }

    fn ready_from(origin: &str) -> InboundEvent {
        InboundEvent::new(origin, json!({"kind": "authorize-ready"}))
    }

    #[test]
    fn walks_the_happy_path() {
        let origin = Origin::parse(PROVIDER).unwrap();
        let provider = MemoryProvider::new(origin.clone());
        let mut handshake: Handshake<MemoryWindow> = Handshake::new(origin);
        assert_eq!(handshake.state(), HandshakeState::Idle);

        handshake.generate_keypair().unwrap();
        assert_eq!(handshake.state(), HandshakeState::KeypairRequested);

        let window = provider
            .open(&url::Url::parse("https://identity.ic0.app/#authorize").unwrap())
            .unwrap();
        handshake.attach_window(window).unwrap();
        assert_eq!(handshake.state(), HandshakeState::WaitingForReady);

        let outcome = handshake.on_message(&ready_from(PROVIDER)).unwrap();
        assert!(matches!(outcome, MessageOutcome::KeyExchanged));
        assert_eq!(handshake.state(), HandshakeState::KeyExchanged);

        let posted = provider.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].target_origin.as_str(), PROVIDER);

        let completed = handshake.into_completed().unwrap();
        assert_eq!(
            posted[0].message,
            OutboundMessage::AuthorizeClient {
                session_public_key: completed.session_public_key().to_vec()
            }
        );
        assert_eq!(
            completed.session_public_key(),
            completed.keypair().public_key_raw().as_slice()
        );
        assert!(!provider.popup_closed());
    }

    #[test]
    fn other_kinds_keep_waiting() {
        let (provider, mut handshake) = waiting();
        for data in [
            json!({"kind": "not-ready"}),
            json!({"kind": "authorize-client-success", "delegations": [], "userPublicKey": []}),
            json!({}),
            json!(null),
        ] {
            let event = InboundEvent::new(PROVIDER, data);
            let outcome = handshake.on_message(&event).unwrap();
            assert!(matches!(outcome, MessageOutcome::Ignored(_)));
            assert_eq!(handshake.state(), HandshakeState::WaitingForReady);
        }
        assert!(provider.posted().is_empty());
    }

    #[test]
    fn foreign_origin_does_not_transition() {
        let (provider, mut handshake) = waiting();
        for origin in ["https://evil.example", "http://identity.ic0.app", "null"] {
            let outcome = handshake.on_message(&ready_from(origin)).unwrap();
            match outcome {
                MessageOutcome::Ignored(HandshakeError::UnexpectedOrigin { got, .. }) => {
                    assert_eq!(got, origin)
                }
                other => panic!("expected origin rejection, got {:?}", other),
            }
            assert_eq!(handshake.state(), HandshakeState::WaitingForReady);
        }
        assert!(provider.posted().is_empty());
    }

    #[test]
    fn second_ready_is_rejected() {
        let (provider, mut handshake) = waiting();
        handshake.on_message(&ready_from(PROVIDER)).unwrap();
        let err = handshake.on_message(&ready_from(PROVIDER)).unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidState { .. }));
        assert_eq!(provider.posted().len(), 1);
    }

    #[test]
    fn abort_closes_popup() {
        let (provider, mut handshake) = waiting();
        handshake.abort(AbortReason::Timeout);
        assert_eq!(
            handshake.state(),
            HandshakeState::Aborted(AbortReason::Timeout)
        );
        assert!(provider.popup_closed());

        handshake.abort(AbortReason::Cancelled);
        assert_eq!(
            handshake.state(),
            HandshakeState::Aborted(AbortReason::Timeout)
        );
    }

    #[test]
    fn abort_after_exchange_is_noop() {
        let (provider, mut handshake) = waiting();
        handshake.on_message(&ready_from(PROVIDER)).unwrap();
        handshake.abort(AbortReason::Cancelled);
        assert_eq!(handshake.state(), HandshakeState::KeyExchanged);
        assert!(!provider.popup_closed());
    }

    #[test]
    fn post_failure_aborts() {
        let (provider, mut handshake) = waiting();
        provider.close_popup();
        assert!(handshake.window_closed());

        let err = handshake.on_message(&ready_from(PROVIDER)).unwrap_err();
        assert!(matches!(err, HandshakeError::PostMessageFailed(_)));
        assert_eq!(
            handshake.state(),
            HandshakeState::Aborted(AbortReason::PostMessageFailed)
        );
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let origin = Origin::parse(PROVIDER).unwrap();
        let mut handshake: Handshake<MemoryWindow> = Handshake::new(origin);
        assert!(matches!(
            handshake.send_public_key(),
            Err(HandshakeError::InvalidState { state: "idle", .. })
        ));
        assert!(handshake.on_message(&ready_from(PROVIDER)).is_err());

        handshake.generate_keypair().unwrap();
        assert!(handshake.generate_keypair().is_err());
        assert!(handshake.into_completed().is_err());
    }

    #[test]
    fn completed_handshake_accepts_bound_delegation() {
        let (_provider, mut handshake) = waiting();
        handshake.on_message(&ready_from(PROVIDER)).unwrap();
        let completed = handshake.into_completed().unwrap();

        let event = InboundEvent::new(
            PROVIDER,
            json!({
                "kind": "authorize-client-success",
                "userPublicKey": [1, 2, 3],
                "delegations": [{
                    "delegation": {
                        "pubkey": completed.session_public_key(),
                        "expiration": "2000"
                    },
                    "signature": [0]
                }]
            }),
        );
        let chain = completed.accept_delegation(&event, 1000).unwrap();
        assert_eq!(chain.expiration, 2000);
        assert_eq!(chain.user_public_key, vec![1, 2, 3]);

        let spoofed = InboundEvent::new("https://evil.example", event.data.clone());
        assert!(matches!(
            completed.accept_delegation(&spoofed, 1000),
            Err(HandshakeError::UnexpectedOrigin { .. })
        ));
    }
}
