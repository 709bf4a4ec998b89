//! In-process identity provider for tests and native embedding.
//!
//! Mirrors browser semantics closely enough to exercise the driver.
//! Messages dispatched while nobody is listening are lost, and listeners
//! only see messages from the origin they subscribed to. Popups can be
//! blocked or closed by the "user", and every `postMessage` is recorded.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::Stream;
use parking_lot::Mutex;
use url::Url;

use crate::error::HandshakeError;
use crate::message::{InboundEvent, OutboundMessage};
use crate::origin::Origin;
use crate::transport::{MessageSource, ProviderWindow, WindowOpener};

/// A message the relying page posted to a provider window.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub message: OutboundMessage,
    pub target_origin: Origin,
}

#[derive(Debug, Default)]
struct WindowRecord {
    posted: Vec<PostedMessage>,
    closed: bool,
}

#[derive(Debug)]
struct Listener {
    origin: Origin,
    sender: UnboundedSender<InboundEvent>,
}

#[derive(Debug)]
struct ProviderState {
    origin: Origin,
    listeners: BTreeMap<u64, Listener>,
    next_listener: u64,
    on_open: Vec<InboundEvent>,
    block_popups: bool,
    windows: Vec<Arc<Mutex<WindowRecord>>>,
    opened: Vec<Url>,
}

impl ProviderState {
    fn dispatch(&mut self, event: &InboundEvent) -> usize {
        let mut delivered = 0;
        self.listeners.retain(|_, listener| {
            if !listener.origin.matches(&event.origin) {
                return true;
            }
            let sent = listener.sender.unbounded_send(event.clone()).is_ok();
            if sent {
                delivered += 1;
            }
            sent
        });
        delivered
    }
}

/// Scriptable provider acting as both window opener and message source.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl MemoryProvider {
    /// A provider page served from `origin` that says nothing on its own.
    pub fn new(origin: Origin) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProviderState {
                origin,
                listeners: BTreeMap::new(),
                next_listener: 0,
                on_open: Vec::new(),
                block_popups: false,
                windows: Vec::new(),
                opened: Vec::new(),
            })),
        }
    }

    /// Post `authorize-ready` from the provider origin as soon as a popup opens.
    pub fn ready_on_open(self) -> Self {
        let origin = self.state.lock().origin.to_string();
        self.respond_on_open(InboundEvent::new(
            origin,
            serde_json::json!({"kind": "authorize-ready"}),
        ))
    }

    /// Queue an event to dispatch when a popup opens, in insertion order.
    pub fn respond_on_open(self, event: InboundEvent) -> Self {
        self.state.lock().on_open.push(event);
        self
    }

    /// Make every `open` fail as if the browser blocked the popup.
    pub fn block_popups(self) -> Self {
        self.state.lock().block_popups = true;
        self
    }

    /// Deliver an event to every listener subscribed to its origin.
    /// Returns how many got it.
    pub fn dispatch(&self, event: InboundEvent) -> usize {
        self.state.lock().dispatch(&event)
    }

    /// Drop every listener channel, ending all subscriptions.
    pub fn shutdown(&self) {
        self.state.lock().listeners.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Everything posted to any popup, oldest first.
    pub fn posted(&self) -> Vec<PostedMessage> {
        let state = self.state.lock();
        state
            .windows
            .iter()
            .flat_map(|window| window.lock().posted.clone())
            .collect()
    }

    pub fn opened_urls(&self) -> Vec<Url> {
        self.state.lock().opened.clone()
    }

    /// Simulate the user closing the most recent popup.
    pub fn close_popup(&self) {
        if let Some(window) = self.state.lock().windows.last() {
            window.lock().closed = true;
        }
    }

    /// Whether the most recent popup is closed.
    pub fn popup_closed(&self) -> bool {
        self.state
            .lock()
            .windows
            .last()
            .is_some_and(|window| window.lock().closed)
    }
}

impl WindowOpener for MemoryProvider {
    type Window = MemoryWindow;

    fn open(&self, url: &Url) -> Result<MemoryWindow, HandshakeError> {
        let mut state = self.state.lock();
        if state.block_popups {
            return Err(HandshakeError::PopupBlocked);
        }

        let record = Arc::new(Mutex::new(WindowRecord::default()));
        state.windows.push(record.clone());
        state.opened.push(url.clone());

        let scripted = std::mem::take(&mut state.on_open);
        for event in &scripted {
            let delivered = state.dispatch(event);
            tracing::trace!(delivered, "memory provider dispatched scripted event");
        }

        Ok(MemoryWindow { record })
    }
}

impl MessageSource for MemoryProvider {
    type Subscription = MemorySubscription;

    fn subscribe(&self, origin: &Origin) -> Result<MemorySubscription, HandshakeError> {
        let (sender, receiver) = mpsc::unbounded();
        let mut state = self.state.lock();
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.insert(
            id,
            Listener {
                origin: origin.clone(),
                sender,
            },
        );

        Ok(MemorySubscription {
            id,
            receiver,
            state: self.state.clone(),
        })
    }
}

/// Popup handle returned by [`MemoryProvider`].
#[derive(Debug)]
pub struct MemoryWindow {
    record: Arc<Mutex<WindowRecord>>,
}

impl ProviderWindow for MemoryWindow {
    fn post_message(
        &self,
        message: &OutboundMessage,
        target_origin: &Origin,
    ) -> Result<(), HandshakeError> {
        let mut record = self.record.lock();
        if record.closed {
            return Err(HandshakeError::PostMessageFailed(
                "window is closed".to_string(),
            ));
        }
        record.posted.push(PostedMessage {
            message: message.clone(),
            target_origin: target_origin.clone(),
        });
        Ok(())
    }

    fn close(&self) {
        self.record.lock().closed = true;
    }

    fn is_closed(&self) -> bool {
        self.record.lock().closed
    }
}

/// A registered listener; unregisters itself on drop.
#[derive(Debug)]
pub struct MemorySubscription {
    id: u64,
    receiver: UnboundedReceiver<InboundEvent>,
    state: Arc<Mutex<ProviderState>>,
}

impl Stream for MemorySubscription {
    type Item = InboundEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<InboundEvent>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.state.lock().listeners.remove(&self.id);
        tracing::debug!(listener = self.id, "message listener released");
    }
}
