//! Async driver for one handshake attempt.
//!
//! The driver is runtime-agnostic: the caller supplies a timer factory
//! (`tokio::time::sleep` natively, a `setTimeout` promise in the browser)
//! and a [`CancelSignal`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::oneshot;
use futures::{pin_mut, FutureExt, StreamExt};

use crate::config::{HandshakeConfig, WINDOW_POLL_INTERVAL};
use crate::error::HandshakeError;
use crate::handshake::{AbortReason, CompletedHandshake, Handshake, MessageOutcome};
use crate::transport::{MessageSource, WindowOpener};

/// Create a linked cancel handle and signal.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (sender, receiver) = oneshot::channel();
    (CancelHandle(sender), CancelSignal(Some(receiver)))
}

/// Requests cancellation of a running handshake.
#[derive(Debug)]
pub struct CancelHandle(oneshot::Sender<()>);

impl CancelHandle {
    pub fn cancel(self) {
        // The attempt may already be over; nothing to cancel then.
        let _ = self.0.send(());
    }
}

/// Resolves when the paired [`CancelHandle`] is used.
///
/// Dropping the handle without cancelling leaves the signal pending forever.
#[derive(Debug)]
pub struct CancelSignal(Option<oneshot::Receiver<()>>);

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self(None)
    }
}

impl Future for CancelSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(receiver) = self.0.as_mut() else {
            return Poll::Pending;
        };
        match receiver.poll_unpin(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            Poll::Ready(Err(oneshot::Canceled)) => {
                self.0 = None;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Run one handshake attempt to completion.
///
/// 1. generate the session keypair,
/// 2. subscribe the message listener,
/// 3. open the provider popup,
/// 4. wait for `authorize-ready` from the provider origin and reply with the
///    public key.
///
/// `sleep` builds timer futures for the host runtime (`tokio::time::sleep`
/// natively, `setTimeout` in the browser). It is used for the overall
/// deadline and to check every [`WINDOW_POLL_INTERVAL`] whether the user
/// closed the popup.
///
/// The listener is subscribed before the popup exists, so a provider that
/// posts immediately on load is never missed. It is released on every exit
/// path when the subscription drops. Any abort closes the popup.
pub async fn run_handshake<O, S, T, F>(
    config: &HandshakeConfig,
    opener: &O,
    source: &S,
    sleep: T,
    cancel: CancelSignal,
) -> Result<CompletedHandshake, HandshakeError>
where
    O: WindowOpener,
    S: MessageSource,
    T: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let mut handshake: Handshake<O::Window> = Handshake::new(config.provider_origin().clone());
    handshake.generate_keypair()?;

    let subscription = match source.subscribe(config.provider_origin()) {
        Ok(subscription) => subscription,
        Err(e) => return Err(fail(&mut handshake, AbortReason::ListenerFailed, e)),
    };
    let mut events = subscription.fuse();
    tracing::debug!("message listener subscribed");

    let window = match opener.open(config.authorize_url()) {
        Ok(window) => window,
        Err(e) => return Err(fail(&mut handshake, AbortReason::PopupBlocked, e)),
    };
    tracing::info!(url = %config.authorize_url(), "opened identity provider window");
    handshake.attach_window(window)?;

    let deadline = sleep(config.timeout()).fuse();
    let window_check = sleep(WINDOW_POLL_INTERVAL).fuse();
    let cancel = cancel.fuse();
    pin_mut!(deadline, window_check, cancel);

    loop {
        futures::select_biased! {
            () = cancel => {
                return Err(fail(&mut handshake, AbortReason::Cancelled, HandshakeError::Cancelled));
            }
            event = events.next() => {
                let Some(event) = event else {
                    return Err(fail(
                        &mut handshake,
                        AbortReason::ListenerClosed,
                        HandshakeError::ListenerClosed,
                    ));
                };
                tracing::debug!(origin = %event.origin, "received message");
                match handshake.on_message(&event)? {
                    MessageOutcome::KeyExchanged => break,
                    MessageOutcome::Ignored(_) => continue,
                }
            }
            () = window_check => {
                if handshake.window_closed() {
                    return Err(fail(
                        &mut handshake,
                        AbortReason::WindowClosed,
                        HandshakeError::WindowClosed,
                    ));
                }
                window_check.set(sleep(WINDOW_POLL_INTERVAL).fuse());
            }
            () = deadline => {
                let (reason, error) = if handshake.window_closed() {
                    (AbortReason::WindowClosed, HandshakeError::WindowClosed)
                } else {
                    (AbortReason::Timeout, HandshakeError::HandshakeTimeout(config.timeout()))
                };
                return Err(fail(&mut handshake, reason, error));
            }
        }
    }

    handshake.into_completed()
}

/// Run a handshake on the `tokio` timer.
#[cfg(not(target_arch = "wasm32"))]
pub async fn run_with_deadline<O, S>(
    config: &HandshakeConfig,
    opener: &O,
    source: &S,
    cancel: CancelSignal,
) -> Result<CompletedHandshake, HandshakeError>
where
    O: WindowOpener,
    S: MessageSource,
{
    run_handshake(config, opener, source, tokio::time::sleep, cancel).await
}

fn fail<W: crate::transport::ProviderWindow>(
    handshake: &mut Handshake<W>,
    reason: AbortReason,
    error: HandshakeError,
) -> HandshakeError {
    tracing::warn!(error = %error, "handshake failed");
    handshake.abort(reason);
    error
}
