// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Output schema inference.
//!
//! When a downstream server never supplies an output schema, one is derived
//! structurally from responses observed in the sandbox: object fields take
//! the type of their observed leaf value, arrays take the union of their
//! element schemas, and anything ambiguous collapses to the any-equivalent
//! empty schema `{}`.

use serde_json::{json, Map, Value};

/// Derive a JSON Schema from an observed value.
pub fn infer_schema(value: &Value) -> Value {
    match value {
        Value::Null => json!({}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                json!({"type": "integer"})
            } else {
                json!({"type": "number"})
            }
        }
        Value::String(_) => json!({"type": "string"}),
        Value::Array(items) => {
            if items.is_empty() {
                return json!({"type": "array", "items": {}});
            }
            let schemas: Vec<Value> = items.iter().map(infer_schema).collect();
            json!({"type": "array", "items": unify(&schemas)})
        }
        Value::Object(map) => {
            let mut properties = Map::new();
            for (key, field) in map {
                properties.insert(key.clone(), infer_schema(field));
            }
            json!({"type": "object", "properties": properties})
        }
    }
}

/// Union of element schemas: identical schemas collapse to one, integers
/// widen into numbers, anything else mixed becomes `{}`.
fn unify(schemas: &[Value]) -> Value {
    let first = &schemas[0];
    if schemas.iter().all(|s| s == first) {
        return first.clone();
    }

    let widen = |s: &Value| -> Value {
        if s == &json!({"type": "integer"}) {
            json!({"type": "number"})
        } else {
            s.clone()
        }
    };
    let widened_first = widen(first);
    if schemas.iter().all(|s| widen(s) == widened_first) {
        return widened_first;
    }

    json!({})
}

/// Extract the value a captured response contributes to inference:
/// `structuredContent` when present, otherwise the first text content item
/// when it parses as JSON.
pub fn response_value(raw: &Value) -> Option<Value> {
    if let Some(structured) = raw.get("structuredContent") {
        if !structured.is_null() {
            return Some(structured.clone());
        }
    }

    let text = raw
        .get("content")?
        .as_array()?
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))?
        .get("text")?
        .as_str()?;

    serde_json::from_str(text).ok()
}
