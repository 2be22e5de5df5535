//! Probe contract and the context probes run in

use super::deadline::ProbeDeadline;
use super::error::{FactError, SoftFailure};
use super::platform::PlatformIdentity;
use super::reader::{FileKind, FileReader};
use super::runner::{CommandOutput, CommandRunner};
use super::{FactCategory, FactSet, FactValue};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// One category of facts for one platform family.
#[async_trait]
pub trait FactProbe: Send + Sync {
    fn category(&self) -> FactCategory;

    /// Short identifier used in logs and diagnostics, e.g. `linux_hardware`.
    fn name(&self) -> &'static str;

    /// Writes facts into `fragment`. Facts written before an error (or before
    /// the deadline fires) are kept.
    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError>;
}

/// Facts and soft failures produced by one probe.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Fragment {
    pub facts: FactSet,
    pub failures: Vec<SoftFailure>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FactValue>) {
        self.facts.insert(key, value);
    }

    pub fn insert_opt<V: Into<FactValue>>(&mut self, key: impl Into<String>, value: Option<V>) {
        self.facts.insert_opt(key, value);
    }

    pub fn fail(&mut self, failure: SoftFailure) {
        if !self.failures.contains(&failure) {
            self.failures.push(failure);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// Everything a probe may touch: the shared identity, the runner and reader,
/// and its own deadline. File reads and commands issued through the context
/// stop as soon as the deadline fires.
#[derive(Clone)]
pub struct ProbeContext {
    pub identity: Arc<PlatformIdentity>,
    runner: Arc<dyn CommandRunner>,
    reader: Arc<dyn FileReader>,
    deadline: ProbeDeadline,
}

impl ProbeContext {
    pub fn new(
        identity: Arc<PlatformIdentity>,
        runner: Arc<dyn CommandRunner>,
        reader: Arc<dyn FileReader>,
        deadline: ProbeDeadline,
    ) -> Self {
        Self {
            identity,
            runner,
            reader,
            deadline,
        }
    }

    pub fn deadline(&self) -> &ProbeDeadline {
        &self.deadline
    }

    /// Same identity and collaborators, different deadline.
    pub fn with_deadline(&self, deadline: ProbeDeadline) -> Self {
        Self {
            deadline,
            ..self.clone()
        }
    }

    pub async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, FactError> {
        self.runner.run(program, args, &self.deadline).await
    }

    /// Trimmed stdout of a successful command. A missing program is recorded
    /// as a soft failure; a failing one simply yields `None`.
    pub async fn stdout(
        &self,
        fragment: &mut Fragment,
        program: &str,
        args: &[&str],
    ) -> Result<Option<String>, FactError> {
        let output = self.run(program, args).await?;
        if output.missing {
            fragment.fail(SoftFailure::tool(program));
            return Ok(None);
        }
        Ok(output.stdout_if_ok().map(str::to_string))
    }

    /// `sysctl -n <key>`, trimmed.
    pub async fn sysctl(
        &self,
        fragment: &mut Fragment,
        key: &str,
    ) -> Result<Option<String>, FactError> {
        self.stdout(fragment, "sysctl", &["-n", key]).await
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> Result<Option<String>, FactError> {
        let path = path.as_ref();
        tokio::select! {
            res = self.reader.read(path) => res,
            _ = self.deadline.expired() => Err(self.timeout()),
        }
    }

    /// File contents with surrounding whitespace removed; blank reads as `None`.
    pub async fn read_trimmed(&self, path: impl AsRef<Path>) -> Result<Option<String>, FactError> {
        Ok(self
            .read(path)
            .await?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    /// Reads as absent once the deadline has fired.
    pub async fn exists(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        tokio::select! {
            found = self.reader.exists(path) => found,
            _ = self.deadline.expired() => false,
        }
    }

    pub async fn file_kind(&self, path: impl AsRef<Path>) -> Result<Option<FileKind>, FactError> {
        let path = path.as_ref();
        tokio::select! {
            kind = self.reader.file_kind(path) => Ok(kind),
            _ = self.deadline.expired() => Err(self.timeout()),
        }
    }

    pub async fn list_dir(&self, path: impl AsRef<Path>) -> Result<Vec<String>, FactError> {
        let path = path.as_ref();
        tokio::select! {
            res = self.reader.list_dir(path) => res,
            _ = self.deadline.expired() => Err(self.timeout()),
        }
    }

    pub async fn read_link(&self, path: impl AsRef<Path>) -> Option<std::path::PathBuf> {
        let path = path.as_ref();
        tokio::select! {
            target = self.reader.read_link(path) => target,
            _ = self.deadline.expired() => None,
        }
    }

    fn timeout(&self) -> FactError {
        FactError::Timeout {
            after: self.deadline.budget(),
        }
    }
}

/// Fallback for families without an implementation of a category.
pub struct UnsupportedProbe {
    category: FactCategory,
}

impl UnsupportedProbe {
    pub fn new(category: FactCategory) -> Self {
        Self { category }
    }
}

#[async_trait]
impl FactProbe for UnsupportedProbe {
    fn category(&self) -> FactCategory {
        self.category
    }

    fn name(&self) -> &'static str {
        "unsupported"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        fragment.fail(SoftFailure::UnsupportedPlatform {
            family: ctx.identity.system.clone(),
        });
        Ok(())
    }
}
