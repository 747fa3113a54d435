use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

const MASK: &str = "***REDACTED***";
const DEFAULT_MAX_BODY_CHARS: usize = 4_000;
const SECRET_HEADERS: [&str; 3] = ["authorization", "proxy-authorization", "x-api-key"];
const SECRET_BODY_KEYS: [&str; 5] = ["api_key", "apikey", "token", "password", "secret"];

/// Settings for the `--verbose` stderr mirror of HTTP traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpDebugConfig {
    pub enabled: bool,
    pub max_body_chars: usize,
}

impl HttpDebugConfig {
    pub fn from_verbose(verbose: bool) -> Self {
        Self {
            enabled: verbose,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
        }
    }

    pub fn disabled() -> Self {
        Self::from_verbose(false)
    }
}

/// `name: value` lines with credentials masked. Used for both the stderr log and the trace.
pub fn header_lines(headers: &HeaderMap) -> Vec<String> {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name.as_str(), header_value(name, value)))
        .collect()
}

fn header_value(name: &HeaderName, value: &HeaderValue) -> String {
    if SECRET_HEADERS.contains(&name.as_str()) {
        return MASK.to_string();
    }
    value
        .to_str()
        .map_or_else(|_| "<non-utf8>".to_string(), str::to_string)
}

/// Masks secret-looking keys at any depth of a JSON body. Other bodies are returned as is.
pub fn mask_body(raw: &str) -> String {
    let Ok(mut json) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };
    mask_value(&mut json);
    serde_json::to_string(&json).unwrap_or_else(|_| raw.to_string())
}

fn mask_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                if SECRET_BODY_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                    *item = Value::String(MASK.to_string());
                } else {
                    mask_value(item);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_value),
        _ => {}
    }
}

pub fn truncate_for_log(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        None => input.to_string(),
        Some((cut, _)) => {
            let dropped = input[cut..].chars().count();
            format!("{}... <truncated {dropped} chars>", &input[..cut])
        }
    }
}
