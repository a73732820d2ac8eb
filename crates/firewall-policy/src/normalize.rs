//! Coercion of relayed payloads into the canonical detector string.

use std::borrow::Cow;

/// A message payload travelling in one direction on one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A text frame.
    Text(String),
    /// A binary frame. There is no separate binary detection path; the
    /// bytes are submitted as (lossy) UTF-8 text.
    Binary(Vec<u8>),
    /// Any other structured value handed over by the host.
    Other(serde_json::Value),
}

impl Payload {
    /// Size of the payload in bytes, for logging.
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
            Payload::Other(value) => value.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Binary(_) => "binary",
            Payload::Other(_) => "other",
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

/// Produce the string submitted to the detector. Never fails.
///
/// - Text is returned as-is.
/// - Binary is decoded as UTF-8, replacing invalid sequences with `U+FFFD`.
/// - A JSON string yields its contents; any other JSON value yields its
///   compact JSON text.
pub fn normalize(payload: &Payload) -> Cow<'_, str> {
    match payload {
        Payload::Text(text) => Cow::Borrowed(text.as_str()),
        Payload::Binary(bytes) => String::from_utf8_lossy(bytes),
        Payload::Other(serde_json::Value::String(text)) => Cow::Borrowed(text.as_str()),
        Payload::Other(value) => Cow::Owned(value.to_string()),
    }
}
