//! `HandshakeSession`: the JS-facing handle for handshake attempts.

use std::cell::RefCell;
use std::rc::Rc;

use delegation_handshake::{
    cancellation, run_handshake, CancelHandle, CompletedHandshake, HandshakeConfig,
    HandshakeOptions,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local, JsFuture};
use web_sys::{HtmlElement, MessageEvent};

use crate::browser::{inbound_event, BrowserContext};
use crate::error::{to_js_error, to_js_value};
use crate::timer::Deadline;

// ============================================================================
// HandshakeSession
// ============================================================================

/// Runs handshake attempts against one identity provider.
///
/// At most one attempt is live at a time: `start()` cancels the previous one.
/// The keypair of the last completed attempt stays available for signing.
#[wasm_bindgen]
#[derive(Clone)]
pub struct HandshakeSession {
    inner: Rc<SessionInner>,
}

struct SessionInner {
    config: HandshakeConfig,
    cancel: RefCell<Option<CancelHandle>>,
    completed: RefCell<Option<CompletedHandshake>>,
}

#[wasm_bindgen]
impl HandshakeSession {
    /// Create a session from `{ authorizeUrl?, timeoutMs? }`.
    ///
    /// `undefined` or `null` selects the default provider and timeout.
    #[wasm_bindgen(constructor)]
    pub fn new(options: JsValue) -> Result<HandshakeSession, JsValue> {
        let config = parse_options(options)?;
        tracing::debug!(
            provider = %config.provider_origin(),
            timeout_ms = config.timeout().as_millis() as u64,
            "handshake session created"
        );
        Ok(Self {
            inner: Rc::new(SessionInner {
                config,
                cancel: RefCell::new(None),
                completed: RefCell::new(None),
            }),
        })
    }

    /// Run one attempt. Resolves with the raw session public key once it has
    /// been posted to the provider, rejects with the abort reason otherwise.
    ///
    /// Must be called from a user gesture, or the popup will be blocked.
    pub fn start(&self) -> js_sys::Promise {
        self.cancel();
        self.inner.completed.borrow_mut().take();

        let (handle, signal) = cancellation();
        *self.inner.cancel.borrow_mut() = Some(handle);

        let inner = Rc::clone(&self.inner);
        future_to_promise(async move {
            let context = BrowserContext::current()?;
            let completed = run_handshake(&inner.config, &context, &context, Deadline::after, signal)
                .await
                .map_err(to_js_error)?;

            let key = js_sys::Uint8Array::from(completed.session_public_key());
            *inner.completed.borrow_mut() = Some(completed);
            Ok(key.into())
        })
    }

    /// Abort the running attempt, if any. The popup is closed.
    pub fn cancel(&self) {
        if let Some(handle) = self.inner.cancel.borrow_mut().take() {
            handle.cancel();
        }
    }

    #[wasm_bindgen(getter, js_name = "providerOrigin")]
    pub fn provider_origin(&self) -> String {
        self.inner.config.provider_origin().to_string()
    }

    /// Raw public key of the last completed attempt.
    #[wasm_bindgen(getter, js_name = "sessionPublicKey")]
    pub fn session_public_key(&self) -> Option<Vec<u8>> {
        self.inner
            .completed
            .borrow()
            .as_ref()
            .map(|completed| completed.session_public_key().to_vec())
    }

    /// Sign with the session key. Returns the 64-byte `r || s` signature.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, JsValue> {
        let completed = self.inner.completed.borrow();
        let completed = completed
            .as_ref()
            .ok_or_else(|| JsValue::from_str("no completed handshake"))?;
        completed.keypair().sign(message).map_err(to_js_error)
    }

    /// Validate an `authorize-client-success` message event from the provider.
    ///
    /// Returns `{ userPublicKey, delegations, expiration }`, with timestamps
    /// in nanoseconds as `BigInt`s.
    #[wasm_bindgen(js_name = "acceptDelegation")]
    pub fn accept_delegation(&self, event: &MessageEvent) -> Result<JsValue, JsValue> {
        let completed = self.inner.completed.borrow();
        let completed = completed
            .as_ref()
            .ok_or_else(|| JsValue::from_str("no completed handshake"))?;

        let inbound = inbound_event(completed.provider_origin(), event).map_err(to_js_error)?;
        let chain = completed
            .accept_delegation(&inbound, now_nanos())
            .map_err(to_js_error)?;
        tracing::info!(
            links = chain.delegations.len(),
            expiration = chain.expiration,
            "delegation chain accepted"
        );
        to_js_value(&chain)
    }
}

// ============================================================================
// Trigger
// ============================================================================

/// Start a handshake whenever `element` is clicked.
///
/// Returns the session driven by the element so the page can cancel it or
/// use the resulting key.
#[wasm_bindgen(js_name = "bindTrigger")]
pub fn bind_trigger(element: &HtmlElement, options: JsValue) -> Result<HandshakeSession, JsValue> {
    let session = HandshakeSession::new(options)?;

    let clicked = session.clone();
    let onclick = Closure::<dyn FnMut()>::new(move || {
        let attempt = JsFuture::from(clicked.start());
        spawn_local(async move {
            match attempt.await {
                Ok(_) => tracing::info!("handshake finished, awaiting delegation"),
                Err(e) => tracing::warn!("handshake failed: {:?}", e),
            }
        });
    });
    element.set_onclick(Some(onclick.as_ref().unchecked_ref()));
    // The element owns the handler for the lifetime of the page.
    onclick.forget();

    Ok(session)
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_options(options: JsValue) -> Result<HandshakeConfig, JsValue> {
    if options.is_undefined() || options.is_null() {
        return Ok(HandshakeConfig::default());
    }
    let options: HandshakeOptions = serde_wasm_bindgen::from_value(options).map_err(to_js_error)?;
    options.into_config().map_err(to_js_error)
}

fn now_nanos() -> u64 {
    (js_sys::Date::now() * 1_000_000.0) as u64
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn default_options_target_identity_provider() {
        let session = HandshakeSession::new(JsValue::UNDEFINED).unwrap();
        assert_eq!(session.provider_origin(), "https://identity.ic0.app");
        assert!(session.session_public_key().is_none());
    }

    #[wasm_bindgen_test]
    fn options_override_provider() {
        let options =
            js_sys::JSON::parse(r#"{"authorizeUrl":"https://id.example.org/login","timeoutMs":1000}"#)
                .unwrap();
        let session = HandshakeSession::new(options).unwrap();
        assert_eq!(session.provider_origin(), "https://id.example.org");
    }

    #[wasm_bindgen_test]
    fn rejects_insecure_provider() {
        let options = js_sys::JSON::parse(r#"{"authorizeUrl":"http://id.example.org"}"#).unwrap();
        assert!(HandshakeSession::new(options).is_err());
    }

    #[wasm_bindgen_test]
    fn sign_requires_completed_handshake() {
        let session = HandshakeSession::new(JsValue::NULL).unwrap();
        assert!(session.sign(b"payload").is_err());
    }

    #[wasm_bindgen_test]
    fn cancel_without_attempt_is_noop() {
        let session = HandshakeSession::new(JsValue::NULL).unwrap();
        session.cancel();
        session.cancel();
    }
}
