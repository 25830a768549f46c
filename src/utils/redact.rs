use serde_json::Value;

/// Number of trailing characters a redacted value keeps.
pub const VISIBLE_SUFFIX: usize = 4;

const MASK: &str = "****";

/// Redacts a secret-like string down to a fixed-length suffix, e.g. `****f00d`.
///
/// Values of `VISIBLE_SUFFIX` characters or fewer are masked entirely so a
/// short secret is never printed whole.
pub fn redact(value: &str) -> String {
    let count = value.chars().count();
    if count <= VISIBLE_SUFFIX {
        return MASK.to_string();
    }
    let suffix: String = value.chars().skip(count - VISIBLE_SUFFIX).collect();
    format!("{}{}", MASK, suffix)
}

/// Redacts an optional value, rendering absence as `<none>`.
pub fn redact_opt(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => redact(v),
        _ => "<none>".to_string(),
    }
}

/// Sanitizes sensitive fields in JSON payloads for logging
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_sensitive_field(key) {
                    mask_value(val)
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "client_secret"
            | "secret"
            | "api_key"
            | "apikey"
            | "token"
            | "authorization"
            | "reader_id"
            // the dashboard sends the client secret under this key
            | "payment_intent_id"
    )
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact(s)),
        _ => Value::String(MASK.to_string()),
    }
}
