//! Initiator side of the identity-provider delegation handshake.
//!
//! A relying page generates an ephemeral P-256 session key, opens the
//! provider's authorization popup, waits for `authorize-ready` from the
//! provider origin and answers with the raw session public key.
//!
//! Window and message plumbing is supplied by the caller through the
//! [`transport`] traits, so the same driver runs in a browser (see the
//! `delegation-handshake-wasm` crate) and natively against
//! [`memory::MemoryProvider`].

pub mod config;
pub mod delegation;
pub mod driver;
pub mod error;
pub mod handshake;
pub mod keypair;
pub mod memory;
pub mod message;
pub mod origin;
pub mod transport;

pub use config::{
    HandshakeConfig, HandshakeOptions, DEFAULT_AUTHORIZE_URL, DEFAULT_TIMEOUT, WINDOW_POLL_INTERVAL,
};
pub use delegation::{Delegation, DelegationChain, SignedDelegation};
#[cfg(not(target_arch = "wasm32"))]
pub use driver::run_with_deadline;
pub use driver::{cancellation, run_handshake, CancelHandle, CancelSignal};
pub use error::HandshakeError;
pub use handshake::{
    AbortReason, CompletedHandshake, Handshake, HandshakeState, MessageOutcome, PendingHandshake,
};
pub use keypair::{SessionKeypair, RAW_PUBLIC_KEY_LENGTH};
pub use message::{InboundEvent, InboundMessage, OutboundMessage};
pub use origin::Origin;
pub use transport::{MessageSource, ProviderWindow, WindowOpener};
