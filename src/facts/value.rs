//! Typed fact values and the ordered fact set

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type FactMap = BTreeMap<String, FactValue>;

/// A single fact value. Probes convert raw command output into one of these
/// variants at their boundary; nothing downstream reparses strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<FactValue>),
    Map(FactMap),
}

impl FactValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FactValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FactValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FactValue]> {
        match self {
            FactValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&FactMap> {
        match self {
            FactValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&FactValue> {
        self.as_map().and_then(|map| map.get(key))
    }

    pub fn is_empty_map(&self) -> bool {
        matches!(self, FactValue::Map(map) if map.is_empty())
    }

    /// Builds a list of strings.
    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FactValue::List(items.into_iter().map(|s| FactValue::Str(s.into())).collect())
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Str(s) => write!(f, "{s}"),
            FactValue::Int(i) => write!(f, "{i}"),
            FactValue::Float(v) => write!(f, "{v}"),
            FactValue::Bool(b) => write!(f, "{b}"),
            other => match serde_json::to_string(other) {
                Ok(json) => write!(f, "{json}"),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        FactValue::Str(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        FactValue::Str(value)
    }
}

impl From<&String> for FactValue {
    fn from(value: &String) -> Self {
        FactValue::Str(value.clone())
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        FactValue::Bool(value)
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        FactValue::Int(value)
    }
}

impl From<u64> for FactValue {
    fn from(value: u64) -> Self {
        FactValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u32> for FactValue {
    fn from(value: u32) -> Self {
        FactValue::Int(i64::from(value))
    }
}

impl From<usize> for FactValue {
    fn from(value: usize) -> Self {
        FactValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        FactValue::Float(value)
    }
}

impl From<FactMap> for FactValue {
    fn from(value: FactMap) -> Self {
        FactValue::Map(value)
    }
}

impl From<Vec<FactValue>> for FactValue {
    fn from(value: Vec<FactValue>) -> Self {
        FactValue::List(value)
    }
}

impl From<Vec<String>> for FactValue {
    fn from(value: Vec<String>) -> Self {
        FactValue::strings(value)
    }
}

impl From<serde_json::Value> for FactValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FactValue::Str(String::new()),
            serde_json::Value::Bool(b) => FactValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FactValue::Int(i)
                } else {
                    FactValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => FactValue::Str(s),
            serde_json::Value::Array(items) => {
                FactValue::List(items.into_iter().map(FactValue::from).collect())
            }
            serde_json::Value::Object(map) => FactValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, FactValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Ordered, string-keyed collection of facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactSet {
    facts: FactMap,
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FactValue>) {
        self.facts.insert(key.into(), value.into());
    }

    /// Inserts only when a value is present.
    pub fn insert_opt<V: Into<FactValue>>(&mut self, key: impl Into<String>, value: Option<V>) {
        if let Some(value) = value {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&FactValue> {
        self.facts.get(key)
    }

    /// Looks a value up by dotted path, e.g. `default_ipv4.address`.
    pub fn get_path(&self, path: &str) -> Option<&FactValue> {
        let mut parts = path.split('.');
        let mut current = self.facts.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FactValue::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FactValue::as_i64)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.facts.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FactValue> {
        self.facts.remove(key)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.facts.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FactValue)> {
        self.facts.iter()
    }

    /// Renames every key to `prefix + key`.
    pub fn with_prefix(self, prefix: &str) -> FactSet {
        FactSet {
            facts: self
                .facts
                .into_iter()
                .map(|(key, value)| (format!("{prefix}{key}"), value))
                .collect(),
        }
    }

    /// Keeps only top-level keys matching at least one shell-style pattern.
    /// An empty pattern list keeps everything.
    pub fn filter(self, patterns: &[String]) -> FactSet {
        if patterns.is_empty() {
            return self;
        }
        let matchers: Vec<Regex> = patterns.iter().filter_map(|p| glob_to_regex(p)).collect();
        FactSet {
            facts: self
                .facts
                .into_iter()
                .filter(|(key, _)| matchers.iter().any(|re| re.is_match(key)))
                .collect(),
        }
    }
}

impl IntoIterator for FactSet {
    type Item = (String, FactValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, FactValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.facts.into_iter()
    }
}

impl FromIterator<(String, FactValue)> for FactSet {
    fn from_iter<T: IntoIterator<Item = (String, FactValue)>>(iter: T) -> Self {
        FactSet {
            facts: iter.into_iter().collect(),
        }
    }
}

fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut expr = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_path_walks_nested_maps() {
        let mut inner = FactMap::new();
        inner.insert("address".to_string(), "10.0.0.5".into());
        let mut facts = FactSet::new();
        facts.insert("default_ipv4", inner);

        assert_eq!(
            facts.get_path("default_ipv4.address").and_then(FactValue::as_str),
            Some("10.0.0.5")
        );
        assert!(facts.get_path("default_ipv4.gateway").is_none());
        assert!(facts.get_path("default_ipv6.address").is_none());
    }

    #[test]
    fn test_filter_uses_glob_patterns() {
        let mut facts = FactSet::new();
        facts.insert("memtotal_mb", 1024u64);
        facts.insert("memfree_mb", 512u64);
        facts.insert("swaptotal_mb", 0u64);

        let filtered = facts.filter(&["mem*".to_string()]);
        assert_eq!(filtered.len(), 2);
        assert!(!filtered.contains_key("swaptotal_mb"));
    }

    #[test]
    fn test_with_prefix_renames_keys() {
        let mut facts = FactSet::new();
        facts.insert("system", "Linux");
        let prefixed = facts.with_prefix("ansible_");
        assert_eq!(prefixed.get_str("ansible_system"), Some("Linux"));
    }

    #[test]
    fn test_serializes_as_plain_json() {
        let mut facts = FactSet::new();
        facts.insert("processor_count", 2u32);
        facts.insert("interfaces", FactValue::strings(["eth0", "lo"]));
        let json = serde_json::to_value(&facts).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"interfaces": ["eth0", "lo"], "processor_count": 2})
        );
    }

    #[test]
    fn test_from_json_keeps_integer_types() {
        let value = FactValue::from(serde_json::json!({"a": 1, "b": 1.5, "c": [true]}));
        assert_eq!(value.get("a"), Some(&FactValue::Int(1)));
        assert_eq!(value.get("b"), Some(&FactValue::Float(1.5)));
        assert_eq!(
            value.get("c"),
            Some(&FactValue::List(vec![FactValue::Bool(true)]))
        );
    }
}
