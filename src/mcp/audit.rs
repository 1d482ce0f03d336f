//! Masking of method params before they reach the audit log

use serde_json::Value;

const MASK: &str = "[REDACTED]";

/// Keys masked when they match exactly (case-insensitive, trimmed).
const EXACT_KEYS: &[&str] = &["authorization", "bearer", "api_key", "apikey"];

/// Keys masked when they contain any of these fragments.
const KEY_FRAGMENTS: &[&str] = &["token", "secret", "password", "credential"];

/// Copy of `params` safe to log; absent params audit as `null`.
pub fn audited_params(params: Option<&Value>) -> Value {
    let Some(params) = params else {
        return Value::Null;
    };
    let mut audited = params.clone();
    mask_in_place(&mut audited);
    audited
}

fn mask_in_place(value: &mut Value) {
    let mut pending = vec![value];
    while let Some(current) = pending.pop() {
        match current {
            Value::Object(map) => {
                for (key, item) in map.iter_mut() {
                    if is_sensitive_key(key) {
                        *item = Value::String(MASK.to_string());
                    } else {
                        pending.push(item);
                    }
                }
            }
            Value::Array(items) => pending.extend(items.iter_mut()),
            _ => {}
        }
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.trim().to_ascii_lowercase();
    EXACT_KEYS.contains(&key.as_str()) || KEY_FRAGMENTS.iter().any(|part| key.contains(part))
}
