use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static COLON_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s*:\s*([^,]+)").expect("valid colon pair regex"));
static EQUALS_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s*=\s*([^,]+)").expect("valid equals pair regex"));

/// Field name → value map that remembers insertion order.
///
/// Keys are trimmed and lower-cased on insertion; inserting an existing key
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    entries: Vec<(String, String)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = normalize_key(key.as_ref());
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut form = FormData::new();
        for (key, value) in iter {
            form.insert(key, value);
        }
        form
    }
}

impl Serialize for FormData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FormData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FormDataVisitor;

        impl<'de> Visitor<'de> for FormDataVisitor {
            type Value = FormData;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FormData, A::Error> {
                let mut form = FormData::new();
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    form.insert(key, value);
                }
                Ok(form)
            }
        }

        deserializer.deserialize_map(FormDataVisitor)
    }
}

/// Parses loosely formatted field data.
///
/// Formats are tried in priority order and the first one that yields any
/// pair wins:
/// 1. `name: John, email: a@b.c`
/// 2. `name=John, email=a@b.c`
/// 3. `name John email a@b.c` (whitespace-alternating key/value tokens)
pub fn parse_form_data(text: &str) -> FormData {
    if let Some(form) = parse_delimited(&COLON_PAIR, text) {
        return form;
    }
    if let Some(form) = parse_delimited(&EQUALS_PAIR, text) {
        return form;
    }
    parse_space_pairs(text)
}

fn parse_delimited(pattern: &Regex, text: &str) -> Option<FormData> {
    let mut matched = false;
    let mut form = FormData::new();
    for caps in pattern.captures_iter(text) {
        matched = true;
        let key = caps[1].trim();
        let value = caps[2].trim();
        if !key.is_empty() && !value.is_empty() {
            form.insert(key, value);
        }
    }
    matched.then_some(form)
}

fn parse_space_pairs(text: &str) -> FormData {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut form = FormData::new();
    for pair in words.chunks_exact(2) {
        let key: String = pair[0]
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            .collect();
        let value = pair[1].trim_end_matches(',');
        if !key.is_empty() && !value.is_empty() {
            form.insert(key, value);
        }
    }
    form
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(form: &FormData) -> Vec<(&str, &str)> {
        form.iter().collect()
    }

    #[test]
    fn colon_format() {
        let form = parse_form_data("name: John Doe, email: jd@example.com");
        assert_eq!(pairs(&form), vec![("name", "John Doe"), ("email", "jd@example.com")]);
    }

    #[test]
    fn colon_value_keeps_later_colons() {
        let form = parse_form_data("website: https://example.com, age: 30");
        assert_eq!(form.get("website"), Some("https://example.com"));
        assert_eq!(form.get("age"), Some("30"));
    }

    #[test]
    fn equals_format_never_uses_colon_parsing() {
        let form = parse_form_data("a=1,b=2");
        assert_eq!(pairs(&form), vec![("a", "1"), ("b", "2")]);
    }

    #[test]
    fn colon_takes_priority_over_equals() {
        let form = parse_form_data("a: x=1");
        assert_eq!(pairs(&form), vec![("a", "x=1")]);
    }

    #[test]
    fn space_pairs_only_without_delimiters() {
        let form = parse_form_data("Name John, email test@gmail.com");
        assert_eq!(pairs(&form), vec![("name", "John"), ("email", "test@gmail.com")]);
    }

    #[test]
    fn space_pairs_drop_trailing_odd_token() {
        let form = parse_form_data("city Paris lonely");
        assert_eq!(pairs(&form), vec![("city", "Paris")]);
    }

    #[test]
    fn reparsing_serialized_reconstruction_is_stable() {
        let form = parse_form_data("a: 1, b: 2");
        let rebuilt = form
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        assert_eq!(parse_form_data(&rebuilt), form);
    }

    #[test]
    fn keys_are_normalized_and_duplicates_replace() {
        let mut form = FormData::new();
        form.insert(" Email ", "a@b.c");
        form.insert("EMAIL", "x@y.z");
        assert_eq!(form.len(), 1);
        assert_eq!(form.get("email"), Some("x@y.z"));
    }

    #[test]
    fn json_keeps_document_order() {
        let form: FormData = serde_json::from_str(r#"{"zeta":"1","alpha":"2"}"#).unwrap();
        assert_eq!(pairs(&form), vec![("zeta", "1"), ("alpha", "2")]);
        assert_eq!(serde_json::to_string(&form).unwrap(), r#"{"zeta":"1","alpha":"2"}"#);
    }
}
