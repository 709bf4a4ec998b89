//! Browser implementations of the handshake transport traits.

use std::pin::Pin;
use std::task::{Context, Poll};

use delegation_handshake::{
    HandshakeError, InboundEvent, MessageSource, Origin, OutboundMessage, ProviderWindow,
    WindowOpener,
};
use futures::channel::mpsc::{self, UnboundedReceiver};
use futures::Stream;
use serde_json::Value;
use url::Url;
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use web_sys::{MessageEvent, Window};

use crate::error::{to_js_error, to_js_value};

/// The page's global `window`: opens popups and receives `message` events.
#[derive(Debug, Clone)]
pub struct BrowserContext {
    window: Window,
}

impl BrowserContext {
    pub fn current() -> Result<Self, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no global window"))?;
        Ok(Self { window })
    }
}

impl WindowOpener for BrowserContext {
    type Window = BrowserPopup;

    fn open(&self, url: &Url) -> Result<BrowserPopup, HandshakeError> {
        match self.window.open_with_url_and_target(url.as_str(), "_blank") {
            Ok(Some(popup)) => Ok(BrowserPopup { window: popup }),
            Ok(None) => Err(HandshakeError::PopupBlocked),
            Err(e) => {
                tracing::warn!("window.open failed: {:?}", e);
                Err(HandshakeError::PopupBlocked)
            }
        }
    }
}

impl MessageSource for BrowserContext {
    type Subscription = BrowserSubscription;

    fn subscribe(&self, origin: &Origin) -> Result<BrowserSubscription, HandshakeError> {
        let (sender, receiver) = mpsc::unbounded();

        let expected = origin.clone();
        let listener = Closure::<dyn FnMut(_)>::new(move |event: MessageEvent| {
            let inbound = match inbound_event(&expected, &event) {
                Ok(inbound) => inbound,
                Err(e) => {
                    tracing::debug!(error = %e, "dropping message");
                    return;
                }
            };
            if sender.unbounded_send(inbound).is_err() {
                tracing::debug!("message arrived after listener was released");
            }
        });

        self.window
            .add_event_listener_with_callback("message", listener.as_ref().unchecked_ref())
            .map_err(|e| HandshakeError::ListenerFailed(format!("{:?}", e)))?;

        Ok(BrowserSubscription {
            window: self.window.clone(),
            listener,
            receiver,
        })
    }
}

/// Handle to the identity provider popup.
#[derive(Debug, Clone)]
pub struct BrowserPopup {
    window: Window,
}

impl ProviderWindow for BrowserPopup {
    fn post_message(
        &self,
        message: &OutboundMessage,
        target_origin: &Origin,
    ) -> Result<(), HandshakeError> {
        let value = to_js_value(message)
            .map_err(|e| HandshakeError::PostMessageFailed(format!("{:?}", e)))?;
        self.window
            .post_message(&value, target_origin.as_str())
            .map_err(|e| HandshakeError::PostMessageFailed(format!("{:?}", e)))
    }

    fn close(&self) {
        if let Err(e) = self.window.close() {
            tracing::warn!("failed to close provider window: {:?}", e);
        }
    }

    fn is_closed(&self) -> bool {
        self.window.closed().unwrap_or(true)
    }
}

/// A registered `message` listener on the page window.
///
/// Dropping it removes the listener.
pub struct BrowserSubscription {
    window: Window,
    listener: Closure<dyn FnMut(MessageEvent)>,
    receiver: UnboundedReceiver<InboundEvent>,
}

impl Stream for BrowserSubscription {
    type Item = InboundEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<InboundEvent>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl Drop for BrowserSubscription {
    fn drop(&mut self) {
        if let Err(e) = self
            .window
            .remove_event_listener_with_callback("message", self.listener.as_ref().unchecked_ref())
        {
            tracing::error!("failed to remove message listener: {:?}", e);
        } else {
            tracing::debug!("message listener released");
        }
    }
}

/// Convert a DOM `MessageEvent` from `expected` into an [`InboundEvent`].
///
/// Events from any other origin are rejected without touching `data`.
/// Data that cannot be represented as JSON becomes `null`, which the
/// handshake rejects as malformed.
pub fn inbound_event(expected: &Origin, event: &MessageEvent) -> Result<InboundEvent, HandshakeError> {
    let origin = event.origin();
    if !expected.matches(&origin) {
        return Err(HandshakeError::UnexpectedOrigin {
            expected: expected.to_string(),
            got: origin,
        });
    }

    let data = js_to_json(&event.data()).unwrap_or_else(|e| {
        tracing::warn!("unreadable message data: {:?}", e);
        Value::Null
    });
    Ok(InboundEvent::new(origin, data))
}

/// Deepest nesting accepted in message data. Also bounds cyclic values.
pub const MAX_DATA_DEPTH: usize = 32;

/// Convert a structured-clone value to JSON.
///
/// Typed arrays and `ArrayBuffer`s become arrays of byte values, and
/// `BigInt`s become decimal strings. Values nested deeper than
/// [`MAX_DATA_DEPTH`] are rejected.
pub fn js_to_json(value: &JsValue) -> Result<Value, JsValue> {
    convert(value, 0)
}

fn convert(value: &JsValue, depth: usize) -> Result<Value, JsValue> {
    if depth > MAX_DATA_DEPTH {
        return Err(JsValue::from_str("message data nested too deeply"));
    }
    if let Some(bytes) = value.dyn_ref::<js_sys::Uint8Array>() {
        return Ok(bytes_to_json(bytes.to_vec()));
    }
    if let Some(buffer) = value.dyn_ref::<js_sys::ArrayBuffer>() {
        return Ok(bytes_to_json(js_sys::Uint8Array::new(buffer).to_vec()));
    }
    if let Some(big) = value.dyn_ref::<js_sys::BigInt>() {
        let text = big.to_string(10).map_err(JsValue::from)?;
        return Ok(Value::String(String::from(text)));
    }
    if js_sys::Array::is_array(value) {
        let array: &js_sys::Array = value.unchecked_ref();
        return array
            .iter()
            .map(|item| convert(&item, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    if value.is_object() && !value.is_function() {
        let mut map = serde_json::Map::new();
        for entry in js_sys::Object::entries(value.unchecked_ref()).iter() {
            let pair: js_sys::Array = entry.unchecked_into();
            let Some(key) = pair.get(0).as_string() else {
                continue;
            };
            map.insert(key, convert(&pair.get(1), depth + 1)?);
        }
        return Ok(Value::Object(map));
    }
    serde_wasm_bindgen::from_value(value.clone()).map_err(to_js_error)
}

fn bytes_to_json(bytes: Vec<u8>) -> Value {
    Value::Array(bytes.into_iter().map(Value::from).collect())
}
