//! Message value object: headers, typed body, and binary attachments.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::headers::Headers;

/// The typed body of a message.
///
/// Heavy payloads (`Bytes`) are reference-counted so copying a message for
/// a multicast branch aliases the data instead of duplicating it.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    /// No body.
    #[default]
    Empty,

    /// UTF-8 text.
    Text(String),

    /// Raw bytes, shared by reference across copies.
    Bytes(Arc<Vec<u8>>),

    /// Structured JSON value.
    Json(Value),
}

impl Body {
    /// The declared type of this body.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    /// The body as a string slice, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Arc::new(bytes))
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// A message flowing through a route: headers + body + attachments.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Ordered, case-insensitive headers.
    pub headers: Headers,

    /// Typed body.
    pub body: Body,

    /// Named binary attachments, aliased by reference on copy.
    attachments: HashMap<String, Arc<Vec<u8>>>,
}

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a message with the given body.
    pub fn with_body(body: impl Into<Body>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Set a header on this message.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.headers.set(name, value);
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    /// Get a header as a string slice.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get_str(name)
    }

    /// Set the body.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    /// Add a named binary attachment.
    pub fn add_attachment(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.attachments.insert(name.into(), Arc::new(data));
    }

    /// Get an attachment by name.
    pub fn attachment(&self, name: &str) -> Option<&Arc<Vec<u8>>> {
        self.attachments.get(name)
    }

    /// Names of all attachments.
    pub fn attachment_names(&self) -> impl Iterator<Item = &str> {
        self.attachments.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_type_names() {
        assert_eq!(Body::Empty.type_name(), "empty");
        assert_eq!(Body::from("hi").type_name(), "text");
        assert_eq!(Body::from(vec![1u8, 2]).type_name(), "bytes");
        assert_eq!(Body::from(serde_json::json!({"a": 1})).type_name(), "json");
    }

    #[test]
    fn test_attachment_aliasing_on_clone() {
        let mut msg = Message::new();
        msg.add_attachment("blob", vec![0u8; 1024]);

        let copy = msg.clone();
        let original = msg.attachment("blob").unwrap();
        let aliased = copy.attachment("blob").unwrap();
        assert!(Arc::ptr_eq(original, aliased));
    }

    #[test]
    fn test_header_roundtrip() {
        let mut msg = Message::with_body("hello");
        msg.set_header("X-Test", "yes");

        assert_eq!(msg.header_str("x-test"), Some("yes"));
        assert_eq!(msg.body.as_text(), Some("hello"));
    }
}
