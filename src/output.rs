//! Result envelope handed back to the control process

use crate::facts::FactSet;
use serde::Serialize;

pub const FACT_PREFIX: &str = "ansible_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub ansible_facts: FactSet,
    pub changed: bool,
}

impl Envelope {
    /// Prefixes every key and keeps those matching `filter`. Patterns may be
    /// written with or without the prefix.
    pub fn new(facts: FactSet, filter: &[String]) -> Self {
        let patterns: Vec<String> = filter
            .iter()
            .map(|p| {
                if p.starts_with(FACT_PREFIX) {
                    p.clone()
                } else {
                    format!("{FACT_PREFIX}{p}")
                }
            })
            .collect();
        Self {
            ansible_facts: facts.with_prefix(FACT_PREFIX).filter(&patterns),
            changed: false,
        }
    }

    pub fn render(&self, format: OutputFormat) -> Result<String, crate::facts::FactError> {
        Ok(match format {
            OutputFormat::Json => serde_json::to_string_pretty(self)?,
            OutputFormat::Yaml => serde_yaml::to_string(self)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FactSet {
        let mut facts = FactSet::new();
        facts.insert("system", "Linux");
        facts.insert("memtotal_mb", 1024u64);
        facts.insert("local", crate::facts::FactMap::new());
        facts
    }

    #[test]
    fn test_keys_are_prefixed() {
        let envelope = Envelope::new(sample(), &[]);
        assert_eq!(envelope.ansible_facts.get_str("ansible_system"), Some("Linux"));
        assert!(envelope.ansible_facts.contains_key("ansible_local"));
        assert!(!envelope.changed);
    }

    #[test]
    fn test_filter_accepts_bare_and_prefixed_patterns() {
        let bare = Envelope::new(sample(), &["mem*".to_string()]);
        assert_eq!(bare.ansible_facts.len(), 1);
        let prefixed = Envelope::new(sample(), &["ansible_sys?em".to_string()]);
        assert!(prefixed.ansible_facts.contains_key("ansible_system"));
    }

    #[test]
    fn test_json_envelope_shape() {
        let rendered = Envelope::new(sample(), &[]).render(OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["changed"], serde_json::Value::Bool(false));
        assert_eq!(parsed["ansible_facts"]["ansible_memtotal_mb"], 1024);
    }
}
