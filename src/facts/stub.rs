//! In-memory runner and reader for fixture-driven collection
//!
//! Both stubs behave like an empty host by default: every command is "not
//! found" and every file is absent. Fixtures register the outputs a simulated
//! platform would produce.

use super::deadline::ProbeDeadline;
use super::error::FactError;
use super::reader::{FileKind, FileReader};
use super::runner::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
enum StubResponse {
    Output(CommandOutput),
    Hang,
    Delay(Duration, CommandOutput),
}

#[derive(Debug, Default)]
pub struct StubRunner {
    responses: HashMap<String, StubResponse>,
    calls: Mutex<Vec<String>>,
}

impl StubRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers stdout for `command line`, e.g. `"uname -s"`.
    pub fn with(mut self, command: &str, stdout: &str) -> Self {
        self.responses.insert(
            command.to_string(),
            StubResponse::Output(CommandOutput::ok(stdout)),
        );
        self
    }

    pub fn with_output(mut self, command: &str, output: CommandOutput) -> Self {
        self.responses
            .insert(command.to_string(), StubResponse::Output(output));
        self
    }

    /// The command never finishes on its own; it ends when the deadline fires.
    pub fn with_hang(mut self, command: &str) -> Self {
        self.responses.insert(command.to_string(), StubResponse::Hang);
        self
    }

    pub fn with_delay(mut self, command: &str, delay: Duration, stdout: &str) -> Self {
        self.responses.insert(
            command.to_string(),
            StubResponse::Delay(delay, CommandOutput::ok(stdout)),
        );
        self
    }

    /// Command lines run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for StubRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        deadline: &ProbeDeadline,
    ) -> Result<CommandOutput, FactError> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.clone());
        }

        let timeout = || FactError::Timeout {
            after: deadline.budget(),
        };

        match self.responses.get(&line).cloned() {
            None => Ok(CommandOutput::not_found()),
            Some(StubResponse::Output(output)) => Ok(output),
            Some(StubResponse::Hang) => {
                deadline.expired().await;
                Err(timeout())
            }
            Some(StubResponse::Delay(delay, output)) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(output),
                    _ = deadline.expired() => Err(timeout()),
                }
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct StubReader {
    files: BTreeMap<PathBuf, String>,
    executables: BTreeSet<PathBuf>,
    dirs: BTreeSet<PathBuf>,
    links: BTreeMap<PathBuf, PathBuf>,
}

impl StubReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.files.insert(path.into(), contents.to_string());
        self
    }

    /// A file whose kind is [`FileKind::Executable`].
    pub fn with_executable(mut self, path: impl Into<PathBuf>, contents: &str) -> Self {
        let path = path.into();
        self.executables.insert(path.clone());
        self.files.insert(path, contents.to_string());
        self
    }

    pub fn with_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.dirs.insert(path.into());
        self
    }

    pub fn with_link(mut self, path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        self.links.insert(path.into(), target.into());
        self
    }

    fn all_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files
            .keys()
            .chain(self.dirs.iter())
            .chain(self.links.keys())
    }
}

#[async_trait]
impl FileReader for StubReader {
    async fn read(&self, path: &Path) -> Result<Option<String>, FactError> {
        Ok(self.files.get(path).filter(|c| !c.is_empty()).cloned())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.all_paths().any(|p| p.starts_with(path))
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>, FactError> {
        let names: BTreeSet<String> = self
            .all_paths()
            .filter_map(|p| p.strip_prefix(path).ok())
            .filter_map(|rest| rest.components().next())
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn read_link(&self, path: &Path) -> Option<PathBuf> {
        self.links.get(path).cloned()
    }

    async fn file_kind(&self, path: &Path) -> Option<FileKind> {
        if self.executables.contains(path) {
            Some(FileKind::Executable)
        } else if self.files.contains_key(path) {
            Some(FileKind::Regular)
        } else if self.links.contains_key(path) {
            Some(FileKind::Other)
        } else if self.exists(path).await {
            Some(FileKind::Directory)
        } else {
            None
        }
    }
}
