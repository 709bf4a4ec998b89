//! WASM bindings for the delegation handshake.
//!
//! Wires the pure Rust driver from `delegation-handshake` to the browser:
//! `window.open` for the provider popup, a `message` event listener for
//! inbound events, and `setTimeout` for the ready deadline.

pub mod browser;
mod error;
pub mod session;
mod timer;

use wasm_bindgen::prelude::*;
use wasm_tracing::WasmLayerConfig;

/// Entry point called when the wasm module is instantiated.
#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();

    if let Err(e) = wasm_tracing::set_as_global_default_with_config(WasmLayerConfig::new()) {
        web_sys::console::warn_1(&format!("tracing not installed: {e}").into());
    }

    tracing::info!("delegation-handshake-wasm v{}", env!("CARGO_PKG_VERSION"));
}

#[cfg(all(test, target_arch = "wasm32"))]
wasm_bindgen_test::wasm_bindgen_test_configure!(run_in_browser);
