//! Collector configuration
//!
//! Loaded from YAML with every field optional; command-line flags override
//! whatever the file sets.

use crate::facts::custom::DEFAULT_FACT_PATH;
use crate::facts::runner::default_extra_paths;
use crate::facts::{FactCategory, FactError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Subset tokens: `all`, `min`, a category name, or `!name` to exclude.
    pub gather_subset: Vec<String>,
    /// Per-probe bound in seconds.
    pub gather_timeout: u64,
    /// Whole-collection bound in seconds.
    pub timeout: u64,
    pub max_concurrency: usize,
    pub fact_path: PathBuf,
    /// Directories searched for binaries after `PATH`.
    pub extra_paths: Vec<PathBuf>,
    /// Shell-style patterns applied to top-level keys.
    pub filter: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            gather_subset: vec!["all".to_string()],
            gather_timeout: 10,
            timeout: 60,
            max_concurrency: 4,
            fact_path: PathBuf::from(DEFAULT_FACT_PATH),
            extra_paths: default_extra_paths(),
            filter: Vec::new(),
        }
    }
}

impl CollectorConfig {
    pub fn from_file(path: &Path) -> Result<Self, FactError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FactError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
            .map_err(|e| FactError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_yaml(content: &str) -> Result<Self, FactError> {
        // An empty document is a valid, all-defaults config.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FactError> {
        if self.max_concurrency == 0 {
            return Err(FactError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.gather_timeout == 0 || self.timeout == 0 {
            return Err(FactError::Config("timeouts must be positive".to_string()));
        }
        self.categories().map(|_| ())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.gather_timeout)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Resolves `gather_subset` into the categories to collect.
    ///
    /// Exclusions alone start from `all`. Distribution is always collected;
    /// custom facts are collected unless `!local` is given.
    pub fn categories(&self) -> Result<BTreeSet<FactCategory>, FactError> {
        let mut included = BTreeSet::new();
        let mut excluded = BTreeSet::new();
        let mut saw_include = false;

        for token in self.gather_subset.iter().flat_map(|s| s.split(',')) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (negated, name) = match token.strip_prefix('!') {
                Some(name) => (true, name),
                None => (false, token),
            };
            let categories = subset_categories(name)?;
            if negated {
                excluded.extend(categories);
            } else {
                saw_include = true;
                included.extend(categories);
            }
        }

        if !saw_include {
            included.extend(FactCategory::BUILTIN);
        }
        included.insert(FactCategory::Custom);
        included.retain(|c| !excluded.contains(c));
        included.insert(FactCategory::Distribution);
        Ok(included)
    }
}

fn subset_categories(name: &str) -> Result<Vec<FactCategory>, FactError> {
    Ok(match name {
        "all" => FactCategory::BUILTIN.to_vec(),
        "min" | "distribution" | "platform" => vec![FactCategory::Distribution],
        "hardware" => vec![FactCategory::Hardware],
        "network" | "interfaces" => vec![FactCategory::Network],
        "virtual" | "virtualization" => vec![FactCategory::Virtualization],
        "local" => vec![FactCategory::Custom],
        other => {
            return Err(FactError::Config(format!(
                "unknown gather_subset entry '{other}'"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subset(tokens: &[&str]) -> BTreeSet<FactCategory> {
        CollectorConfig {
            gather_subset: tokens.iter().map(|t| t.to_string()).collect(),
            ..CollectorConfig::default()
        }
        .categories()
        .unwrap()
    }

    #[test]
    fn test_default_gathers_everything() {
        let all = subset(&["all"]);
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_min_is_distribution_plus_local() {
        assert_eq!(
            subset(&["min"]),
            BTreeSet::from([FactCategory::Distribution, FactCategory::Custom])
        );
    }

    #[test]
    fn test_exclusions_start_from_all() {
        let categories = subset(&["!hardware,!local"]);
        assert!(!categories.contains(&FactCategory::Hardware));
        assert!(!categories.contains(&FactCategory::Custom));
        assert!(categories.contains(&FactCategory::Network));
    }

    #[test]
    fn test_distribution_cannot_be_excluded() {
        assert!(subset(&["!all"]).contains(&FactCategory::Distribution));
    }

    #[test]
    fn test_unknown_subset_is_config_error() {
        let config = CollectorConfig {
            gather_subset: vec!["gpu".to_string()],
            ..CollectorConfig::default()
        };
        assert!(matches!(config.categories(), Err(FactError::Config(_))));
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let config = CollectorConfig::from_yaml(
            "gather_subset: [network, virtual]\ngather_timeout: 3\nfact_path: /opt/facts.d\n",
        )
        .unwrap();
        assert_eq!(config.gather_timeout, 3);
        assert_eq!(config.timeout, 60);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.fact_path, PathBuf::from("/opt/facts.d"));
        assert!(!config.categories().unwrap().contains(&FactCategory::Hardware));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(CollectorConfig::from_yaml("max_concurrency: 0\n").is_err());
    }
}
