//! Error conversion for WASM boundary.

use serde::Serialize;
use wasm_bindgen::JsValue;

/// Convert any error with Display into a JsValue error.
pub fn to_js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Serialize a Rust value to a JS value as plain objects.
///
/// Maps become plain objects rather than JS `Map`s, byte buffers become
/// `Uint8Array`s, and nanosecond timestamps too large for a JS number become
/// `BigInt`s.
pub fn to_js_value(value: &impl Serialize) -> Result<JsValue, JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::new()
        .serialize_maps_as_objects(true)
        .serialize_large_number_types_as_bigints(true);
    value.serialize(&serializer).map_err(to_js_error)
}
