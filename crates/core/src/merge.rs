// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recursive deep-merge over JSON values.

use serde_json::Value;

/// Merge `overlay` into `base` and return the result.
///
/// Two objects merge key-by-key, recursing on shared keys. Any other
/// combination (scalar/scalar, object/scalar, arrays) resolves to the
/// overlay value, so later secret files override earlier ones.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
#[path = "merge_tests.rs"]
mod tests;
