//! Seams between the handshake and the environment hosting it.
//!
//! A browser implements these with `window.open`, `postMessage` and a
//! `message` event listener; tests use [`crate::memory::MemoryProvider`].

use futures::Stream;
use url::Url;

use crate::error::HandshakeError;
use crate::message::{InboundEvent, OutboundMessage};
use crate::origin::Origin;

/// Handle to an opened identity provider window.
pub trait ProviderWindow {
    /// Post `message` to the window, delivered only if the window's current
    /// origin is `target_origin`.
    fn post_message(
        &self,
        message: &OutboundMessage,
        target_origin: &Origin,
    ) -> Result<(), HandshakeError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens provider windows.
pub trait WindowOpener {
    type Window: ProviderWindow;

    /// Open a new browsing context at `url`.
    ///
    /// Returns [`HandshakeError::PopupBlocked`] if no window was created.
    fn open(&self, url: &Url) -> Result<Self::Window, HandshakeError>;
}

/// Source of inbound cross-origin messages.
///
/// Each subscription is one registered listener. Dropping the subscription
/// unregisters it.
pub trait MessageSource {
    type Subscription: Stream<Item = InboundEvent> + Unpin;

    /// Register a listener for messages sent from `origin`.
    ///
    /// Events from any other origin are dropped before their payload is read.
    fn subscribe(&self, origin: &Origin) -> Result<Self::Subscription, HandshakeError>;
}
