//! Console configuration document
//!
//! The document mounted into the console is the built-in default merged with
//! the record's `config` overlay. Its SHA-256 over a canonical, key-sorted
//! serialization is the content-version marker that drives rollouts.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::crd::WebConsole;
use crate::error::Result;

/// Built-in document every overlay is merged onto
pub fn default_document() -> Value {
    json!({
        "about": {
            "title": "Web Console",
            "description": "A web console for inspecting and managing applications.",
            "imgSrc": "img/logo.svg",
            "productInfo": [],
            "copyright": ""
        },
        "branding": {
            "appName": "Web Console",
            "appLogoUrl": "img/logo.svg",
            "css": "",
            "favicon": "favicon.ico"
        },
        "online": {
            "projectSelector": "",
            "consoleLink": {
                "text": "Web Console",
                "section": "Web Console",
                "imageRelativePath": "/online/img/favicon.ico"
            }
        },
        "disabledRoutes": []
    })
}

/// Merge `overlay` onto `base`.
///
/// Maps merge key by key, recursively. Any other overlay value replaces the
/// base value outright, as does a map whose base counterpart is not a map.
/// Base keys absent from the overlay are carried through.
pub fn deep_merge(base: Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                base_map.insert(key.clone(), merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// The merged document for a record
pub fn render_document(console: &WebConsole) -> Result<Value> {
    let overlay = serde_json::to_value(&console.spec.config)?;
    Ok(deep_merge(default_document(), &overlay))
}

/// Serialize with every map's keys sorted, independent of `serde_json` features
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex SHA-256 of the canonical form
pub fn content_version(value: &Value) -> String {
    let digest = Sha256::digest(canonical_json(value).as_bytes());
    hex::encode(digest)
}

/// Look up a string at a JSON pointer, e.g. `/online/consoleLink/text`
pub fn string_at<'a>(document: &'a Value, pointer: &str) -> Option<&'a str> {
    document
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
