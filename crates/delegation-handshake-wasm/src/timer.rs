//! `setTimeout`-backed timer future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use js_sys::Promise;
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

/// Resolves once `duration` has elapsed. Dropping it clears the timer.
pub(crate) struct Deadline {
    fired: JsFuture,
    handle: Option<i32>,
    _on_fire: Option<Closure<dyn FnMut()>>,
}

impl Deadline {
    pub(crate) fn after(duration: Duration) -> Self {
        let delay_ms = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        let mut handle = None;
        let mut on_fire = None;

        let fired = Promise::new(&mut |resolve, reject| {
            let callback = Closure::once(move || {
                if let Err(e) = resolve.call0(&JsValue::NULL) {
                    tracing::error!("failed to resolve timer: {:?}", e);
                }
            });

            let scheduled = web_sys::window()
                .ok_or_else(|| JsValue::from_str("no global window"))
                .and_then(|window| {
                    window.set_timeout_with_callback_and_timeout_and_arguments_0(
                        callback.as_ref().unchecked_ref(),
                        delay_ms,
                    )
                });

            match scheduled {
                Ok(id) => {
                    handle = Some(id);
                    on_fire = Some(callback);
                }
                Err(e) => {
                    // Surfaces in `poll`, which then resolves immediately.
                    let _ = reject.call1(&JsValue::NULL, &e);
                }
            }
        });

        Self {
            fired: JsFuture::from(fired),
            handle,
            _on_fire: on_fire,
        }
    }
}

impl Future for Deadline {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match Pin::new(&mut self.fired).poll(cx) {
            Poll::Ready(Ok(_)) => Poll::Ready(()),
            Poll::Ready(Err(e)) => {
                tracing::error!("timer could not be scheduled: {:?}", e);
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if let (Some(id), Some(window)) = (self.handle, web_sys::window()) {
            window.clear_timeout_with_handle(id);
        }
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    async fn resolves_after_delay() {
        let started = js_sys::Date::now();
        Deadline::after(Duration::from_millis(20)).await;
        assert!(js_sys::Date::now() - started >= 15.0);
    }

    #[wasm_bindgen_test]
    fn dropping_clears_timer() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(deadline.handle.is_some());
        drop(deadline);
    }
}
