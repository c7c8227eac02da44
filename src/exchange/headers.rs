//! Ordered, case-insensitive header map.
//!
//! Keys compare case-insensitively but iteration preserves insertion order
//! and the casing of the first write. Values are opaque JSON values so
//! processors can carry typed data without the engine caring about it.

use indexmap::IndexMap;
use serde_json::Value;

/// Message headers: insertion-ordered with case-insensitive keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    // Keyed by the lowercased name; stores the original casing for iteration.
    entries: IndexMap<String, (String, Value)>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any existing value under the same
    /// case-insensitive key. The entry keeps its original position and the
    /// casing of the first write.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        let value = value.into();
        match self.entries.get_mut(&key) {
            Some((_, existing)) => *existing = value,
            None => {
                self.entries.insert(key, (name, value));
            }
        }
    }

    /// Get a header value by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, v)| v)
    }

    /// Get a header as a string slice, if it is a JSON string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Remove a header, returning its value if present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries
            .shift_remove(&name.to_ascii_lowercase())
            .map(|(_, v)| v)
    }

    /// Whether a header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate headers in insertion order with original-case names.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.values().map(|(name, v)| (name.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_case_insensitive_access() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/plain");

        assert_eq!(headers.get_str("content-type"), Some("text/plain"));
        assert_eq!(headers.get_str("CONTENT-TYPE"), Some("text/plain"));
        assert!(headers.contains("Content-type"));
    }

    #[test]
    fn test_set_preserves_position_and_casing() {
        let mut headers = Headers::new();
        headers.set("First", 1);
        headers.set("Second", 2);
        headers.set("FIRST", 10);

        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["First", "Second"]);
        assert_eq!(headers.get("first"), Some(&json!(10)));
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.set("a", "1");
        assert_eq!(headers.remove("A"), Some(json!("1")));
        assert!(headers.is_empty());
        assert_eq!(headers.remove("a"), None);
    }
}
