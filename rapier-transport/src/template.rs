// Path templates
// Substitutes `:name` placeholders in a URL from a parameter record.
// A placeholder name starts with an ASCII letter or `_`, so `http://` and
// `host:8080` are left alone. The authority (`user:pass@host:port`) is
// never scanned, and string values are percent-encoded as one segment.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("Missing value for path parameter '{0}'")]
    MissingParameter(String),
    #[error("Path parameter '{name}' must be a string, number or boolean, got {found}")]
    InvalidValue { name: String, found: String },
}

/// Result of expanding a template against a parameter record.
#[derive(Debug, Clone, PartialEq)]
pub struct Expanded {
    pub url: String,
    /// Parameter keys consumed by placeholders, in order of first use
    pub consumed: Vec<String>,
    /// Parameters no placeholder referenced
    pub remaining: Map<String, Value>,
}

/// Expand every `:name` placeholder in `template` from `params`.
pub fn expand(template: &str, params: &Map<String, Value>) -> Result<Expanded, TemplateError> {
    let mut url = String::with_capacity(template.len());
    let mut consumed: Vec<String> = Vec::new();

    let (authority, path) = template.split_at(authority_end(template));
    url.push_str(authority);
    let mut chars = path.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        let starts_name = c == ':'
            && chars
                .peek()
                .is_some_and(|&(_, next)| next.is_ascii_alphabetic() || next == '_');
        if !starts_name {
            url.push(c);
            continue;
        }

        let mut name = String::new();
        while let Some(&(_, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                name.push(next);
                chars.next();
            } else {
                break;
            }
        }

        let value = params
            .get(&name)
            .ok_or_else(|| TemplateError::MissingParameter(name.clone()))?;
        url.push_str(&segment(&name, value)?);
        if !consumed.contains(&name) {
            consumed.push(name);
        }
    }

    let remaining = params
        .iter()
        .filter(|(key, _)| !consumed.contains(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(Expanded {
        url,
        consumed,
        remaining,
    })
}

/// Byte offset just past the authority of an absolute URL, 0 otherwise
fn authority_end(template: &str) -> usize {
    match template.find("://") {
        Some(scheme_end) => {
            let start = scheme_end + 3;
            template[start..]
                .find(['/', '?', '#'])
                .map_or(template.len(), |offset| start + offset)
        }
        None => 0,
    }
}

fn segment(name: &str, value: &Value) -> Result<String, TemplateError> {
    match value {
        Value::String(s) => Ok(encode_segment(s)),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(TemplateError::InvalidValue {
            name: name.to_string(),
            found: kind(other).to_string(),
        }),
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set
fn encode_segment(raw: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            encoded.push(char::from(byte));
        } else {
            encoded.push('%');
            encoded.push(char::from(HEX[usize::from(byte >> 4)]));
            encoded.push(char::from(HEX[usize::from(byte & 0x0F)]));
        }
    }
    encoded
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
