//! Fact aggregation across categories
//!
//! The aggregator detects the platform once, runs one probe per requested
//! category through a bounded pool, and merges the fragments in a fixed
//! category order once every probe has finished or been abandoned.

use super::custom::CustomFactsProbe;
use super::deadline::ProbeDeadline;
use super::error::{Diagnostic, FactError, SoftFailure};
use super::platform::{self, PlatformIdentity};
use super::probe::{FactProbe, Fragment, ProbeContext};
use super::reader::{FileReader, SystemFileReader};
use super::runner::{CommandRunner, SystemCommandRunner};
use super::{hardware, network, virtualization, FactCategory, FactSet};
use crate::config::CollectorConfig;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a category's probe ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Completed,
    /// Hit its own bound, or was still running at the overall deadline.
    TimedOut,
    /// Stopped on an error; facts written before it are kept.
    Failed,
}

/// Result of one aggregator run.
#[derive(Debug, Clone)]
pub struct Collection {
    pub facts: FactSet,
    pub diagnostics: Vec<Diagnostic>,
    pub states: BTreeMap<FactCategory, ProbeState>,
    pub identity: Arc<PlatformIdentity>,
}

pub struct FactAggregator {
    config: CollectorConfig,
    runner: Arc<dyn CommandRunner>,
    reader: Arc<dyn FileReader>,
    identity: Option<Arc<PlatformIdentity>>,
    overrides: BTreeMap<FactCategory, Arc<dyn FactProbe>>,
}

impl FactAggregator {
    pub fn new(config: CollectorConfig) -> Self {
        let runner = SystemCommandRunner::new(config.extra_paths.clone());
        Self {
            config,
            runner: Arc::new(runner),
            reader: Arc::new(SystemFileReader),
            identity: None,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_reader(mut self, reader: Arc<dyn FileReader>) -> Self {
        self.reader = reader;
        self
    }

    /// Skips platform detection and uses `identity` as-is.
    pub fn with_identity(mut self, identity: PlatformIdentity) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    /// Replaces the built-in probe for the probe's category.
    pub fn with_probe(mut self, probe: impl FactProbe + 'static) -> Self {
        self.overrides.insert(probe.category(), Arc::new(probe));
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub async fn collect(&self) -> Result<Collection, FactError> {
        self.config.validate()?;
        let categories = self.config.categories()?;
        let started = Instant::now();
        let overall = ProbeDeadline::new(self.config.overall_timeout());

        let identity = match &self.identity {
            Some(identity) => identity.clone(),
            None => {
                let deadline =
                    ProbeDeadline::child_of(overall.token(), self.config.probe_timeout());
                Arc::new(
                    PlatformIdentity::collect(self.runner.clone(), self.reader.clone(), deadline)
                        .await,
                )
            }
        };
        info!(
            family = %identity.family,
            categories = ?categories,
            "collecting facts"
        );

        let ctx = ProbeContext::new(
            identity.clone(),
            self.runner.clone(),
            self.reader.clone(),
            overall.clone(),
        );
        let probes = self.plan(&identity, &categories);
        let budget = self.config.probe_timeout();

        let mut reports: BTreeMap<FactCategory, ProbeReport> = BTreeMap::new();
        let drained = {
            let mut pending = stream::iter(
                probes
                    .into_iter()
                    .map(|probe| run_probe(&ctx, probe, budget, overall.token())),
            )
            .buffer_unordered(self.config.max_concurrency.max(1));

            tokio::time::timeout_at(overall.expires_at(), async {
                while let Some(report) = pending.next().await {
                    reports.insert(report.category, report);
                }
            })
            .await
        };
        if drained.is_err() {
            warn!(
                timeout_ms = self.config.overall_timeout().as_millis() as u64,
                "overall collection deadline reached, keeping finished categories"
            );
        }
        // Kills whatever is still running on behalf of abandoned probes.
        overall.cancel();

        let mut collection = Collection {
            facts: FactSet::new(),
            diagnostics: Vec::new(),
            states: BTreeMap::new(),
            identity,
        };

        for category in &categories {
            let Some(report) = reports.remove(category) else {
                collection.states.insert(*category, ProbeState::TimedOut);
                record(
                    &mut collection.diagnostics,
                    *category,
                    "abandoned",
                    SoftFailure::Timeout {
                        after_ms: self.config.overall_timeout().as_millis() as u64,
                    },
                );
                continue;
            };
            if let Some(error) = report.hard_error {
                return Err(error);
            }
            collection.states.insert(*category, report.state);
            merge(&mut collection, *category, report.probe, report.fragment);
        }

        info!(
            facts = collection.facts.len(),
            diagnostics = collection.diagnostics.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fact collection finished"
        );
        Ok(collection)
    }

    /// One probe per requested category, overrides first.
    fn plan(
        &self,
        identity: &PlatformIdentity,
        categories: &BTreeSet<FactCategory>,
    ) -> Vec<Arc<dyn FactProbe>> {
        categories
            .iter()
            .map(|category| {
                if let Some(probe) = self.overrides.get(category) {
                    return probe.clone();
                }
                let family = identity.family;
                match category {
                    FactCategory::Distribution => Arc::from(platform::probe::probe_for(family)),
                    FactCategory::Hardware => Arc::from(hardware::probe_for(family)),
                    FactCategory::Network => Arc::from(network::probe_for(family)),
                    FactCategory::Virtualization => Arc::from(virtualization::probe_for(family)),
                    FactCategory::Custom => {
                        Arc::new(CustomFactsProbe::new(&self.config.fact_path)) as Arc<dyn FactProbe>
                    }
                }
            })
            .collect()
    }
}

struct ProbeReport {
    category: FactCategory,
    probe: &'static str,
    fragment: Fragment,
    state: ProbeState,
    hard_error: Option<FactError>,
}

async fn run_probe(
    ctx: &ProbeContext,
    probe: Arc<dyn FactProbe>,
    budget: Duration,
    parent: &CancellationToken,
) -> ProbeReport {
    let deadline = ProbeDeadline::child_of(parent, budget);
    let ctx = ctx.with_deadline(deadline.clone());
    let mut fragment = Fragment::new();
    debug!(probe = probe.name(), category = %probe.category(), "probe started");

    let result = tokio::time::timeout(budget, probe.collect(&ctx, &mut fragment)).await;
    deadline.cancel();

    let mut hard_error = None;
    let state = match result {
        Ok(Ok(())) => ProbeState::Completed,
        Ok(Err(FactError::Timeout { .. })) | Err(_) => {
            fragment.fail(SoftFailure::Timeout {
                after_ms: budget.as_millis() as u64,
            });
            ProbeState::TimedOut
        }
        Ok(Err(error)) if error.is_hard() => {
            hard_error = Some(error);
            ProbeState::Failed
        }
        Ok(Err(error)) => {
            fragment.fail(SoftFailure::parse(probe.name(), error.to_string()));
            ProbeState::Failed
        }
    };
    debug!(
        probe = probe.name(),
        state = ?state,
        facts = fragment.facts.len(),
        "probe finished"
    );

    ProbeReport {
        category: probe.category(),
        probe: probe.name(),
        fragment,
        state,
        hard_error,
    }
}

/// Adds a fragment's facts, keeping the value from whichever category
/// claimed a key first.
fn merge(
    collection: &mut Collection,
    category: FactCategory,
    probe: &'static str,
    fragment: Fragment,
) {
    for failure in fragment.failures {
        record(&mut collection.diagnostics, category, probe, failure);
    }
    for (key, value) in fragment.facts {
        if collection.facts.contains_key(&key) {
            warn!(key = %key, category = %category, "fact key already set by an earlier category");
            record(
                &mut collection.diagnostics,
                category,
                probe,
                SoftFailure::parse(probe, format!("duplicate fact key '{key}'")),
            );
            continue;
        }
        collection.facts.insert(key, value);
    }
}

fn record(
    diagnostics: &mut Vec<Diagnostic>,
    category: FactCategory,
    probe: &str,
    failure: SoftFailure,
) {
    match &failure {
        SoftFailure::Timeout { after_ms } => {
            warn!(probe, category = %category, after_ms, "probe timed out")
        }
        other => debug!(probe, category = %category, failure = %other, "soft failure"),
    }
    diagnostics.push(Diagnostic {
        category,
        probe: probe.to_string(),
        failure,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::stub::{StubReader, StubRunner};
    use async_trait::async_trait;

    struct Fixed(FactCategory, &'static str);

    #[async_trait]
    impl FactProbe for Fixed {
        fn category(&self) -> FactCategory {
            self.0
        }

        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn collect(&self, _ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
            fragment.insert("shared_key", self.1);
            Ok(())
        }
    }

    fn aggregator() -> FactAggregator {
        let config = CollectorConfig {
            fact_path: "/nonexistent/facts.d".into(),
            ..CollectorConfig::default()
        };
        FactAggregator::new(config)
            .with_runner(Arc::new(StubRunner::new()))
            .with_reader(Arc::new(StubReader::new()))
    }

    #[tokio::test]
    async fn test_earlier_category_keeps_clashing_key() {
        let collection = aggregator()
            .with_probe(Fixed(FactCategory::Virtualization, "virtual"))
            .with_probe(Fixed(FactCategory::Hardware, "hardware"))
            .collect()
            .await
            .unwrap();
        assert_eq!(collection.facts.get_str("shared_key"), Some("hardware"));
        assert!(collection
            .diagnostics
            .iter()
            .any(|d| d.category == FactCategory::Virtualization));
    }

    #[tokio::test]
    async fn test_unknown_platform_still_succeeds() {
        let collection = aggregator().collect().await.unwrap();
        assert_eq!(collection.facts.get_str("system"), Some("NA"));
        assert!(!collection.facts.contains_key("virtualization_type"));
        assert_eq!(
            collection.states.get(&FactCategory::Hardware),
            Some(&ProbeState::Completed)
        );
    }
}
