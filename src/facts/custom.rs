//! User-supplied facts from `*.fact` files
//!
//! Every file in the fact directory contributes one entry under `local`,
//! keyed by file stem. Executables are run and their stdout parsed; anything
//! else is read as-is. Content is tried as JSON first, then YAML.

use super::probe::{FactProbe, Fragment, ProbeContext};
use super::reader::FileKind;
use super::{FactCategory, FactError, FactMap, FactValue, SoftFailure};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_FACT_PATH: &str = "/etc/ansible/facts.d";
const LOAD_ERROR: &str = "error loading fact - please check content";

pub struct CustomFactsProbe {
    fact_path: PathBuf,
}

impl CustomFactsProbe {
    pub fn new(fact_path: impl Into<PathBuf>) -> Self {
        Self {
            fact_path: fact_path.into(),
        }
    }
}

#[async_trait]
impl FactProbe for CustomFactsProbe {
    fn category(&self) -> FactCategory {
        FactCategory::Custom
    }

    fn name(&self) -> &'static str {
        "custom_facts"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        if !ctx.exists(&self.fact_path).await {
            debug!(path = %self.fact_path.display(), "no custom fact directory");
            return Ok(());
        }

        let mut local = FactMap::new();
        for name in ctx.list_dir(&self.fact_path).await? {
            let Some(stem) = name.strip_suffix(".fact").filter(|s| !s.is_empty()) else {
                continue;
            };
            let path = self.fact_path.join(&name);
            let value = match ctx.file_kind(&path).await? {
                Some(FileKind::Executable) => run_fact_script(ctx, &path, fragment).await?,
                Some(FileKind::Regular) => match ctx.read(&path).await? {
                    Some(content) => parse_fact(&content, &path, fragment),
                    None => FactValue::Map(FactMap::new()),
                },
                _ => continue,
            };
            local.insert(stem.to_string(), value);
        }
        fragment.insert("local", local);
        Ok(())
    }
}

async fn run_fact_script(
    ctx: &ProbeContext,
    path: &Path,
    fragment: &mut Fragment,
) -> Result<FactValue, FactError> {
    let program = path.to_string_lossy();
    let output = ctx.run(&program, &[]).await?;
    if output.missing {
        fragment.fail(SoftFailure::tool(program.as_ref()));
        return Ok(FactValue::from(LOAD_ERROR));
    }
    if output.rc != 0 {
        fragment.fail(SoftFailure::parse(
            program.as_ref(),
            format!("exited with status {}", output.rc),
        ));
    }
    // Lossy decoding leaves replacement characters behind.
    if output.stdout.contains(char::REPLACEMENT_CHARACTER) {
        fragment.fail(SoftFailure::parse(program.as_ref(), "output is not utf-8"));
        return Ok(FactValue::from(format!(
            "error loading fact - output of running \"{program}\" was not utf-8"
        )));
    }
    Ok(parse_fact(output.stdout.trim(), path, fragment))
}

/// JSON, then YAML. A bare YAML scalar is not a fact document.
fn parse_fact(content: &str, path: &Path, fragment: &mut Fragment) -> FactValue {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(content) {
        return value.into();
    }
    match serde_yaml::from_str::<serde_json::Value>(content) {
        Ok(value @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => value.into(),
        Ok(_) => {
            fragment.fail(SoftFailure::parse(
                path.display().to_string(),
                "neither a JSON nor a YAML document",
            ));
            FactValue::from(LOAD_ERROR)
        }
        Err(e) => {
            fragment.fail(SoftFailure::parse(path.display().to_string(), e.to_string()));
            FactValue::from(LOAD_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::platform::PlatformIdentity;
    use crate::facts::stub::{StubReader, StubRunner};
    use crate::facts::{ProbeDeadline, SystemFileReader};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(runner: StubRunner) -> ProbeContext {
        ProbeContext::new(
            Arc::new(PlatformIdentity::unknown()),
            Arc::new(runner),
            Arc::new(SystemFileReader),
            ProbeDeadline::unbounded(),
        )
    }

    async fn collect(dir: &Path, runner: StubRunner) -> Fragment {
        let mut fragment = Fragment::new();
        CustomFactsProbe::new(dir)
            .collect(&context(runner), &mut fragment)
            .await
            .unwrap();
        fragment
    }

    #[tokio::test]
    async fn test_json_and_yaml_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.fact"), r#"{"version": "1.4.2", "port": 8080}"#).unwrap();
        std::fs::write(dir.path().join("site.fact"), "role: web\ntier: 2\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let fragment = collect(dir.path(), StubRunner::new()).await;
        assert_eq!(
            fragment.facts.get_path("local.app.version").and_then(FactValue::as_str),
            Some("1.4.2")
        );
        assert_eq!(
            fragment.facts.get_path("local.site.role").and_then(FactValue::as_str),
            Some("web")
        );
        assert!(fragment.facts.get_path("local.notes").is_none());
        assert!(fragment.failures.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_content_is_flagged() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.fact"), "just some words").unwrap();

        let fragment = collect(dir.path(), StubRunner::new()).await;
        assert_eq!(
            fragment.facts.get_path("local.broken").and_then(FactValue::as_str),
            Some(LOAD_ERROR)
        );
        assert!(matches!(
            fragment.failures.as_slice(),
            [SoftFailure::ParseMismatch { .. }]
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executable_fact_runs_through_runner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("dynamic.fact");
        std::fs::write(&script, "#!/bin/sh\necho unused\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runner = StubRunner::new().with(&script.to_string_lossy(), "{\"generated\": true}\n");
        let fragment = collect(dir.path(), runner).await;
        assert_eq!(
            fragment.facts.get_path("local.dynamic.generated"),
            Some(&FactValue::Bool(true))
        );
    }

    #[tokio::test]
    async fn test_missing_directory_adds_nothing() {
        let dir = TempDir::new().unwrap();
        let fragment = collect(&dir.path().join("facts.d"), StubRunner::new()).await;
        assert!(fragment.is_empty());
        assert!(fragment.failures.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_fact_directory() {
        let reader = StubReader::new()
            .with_file("/etc/ansible/facts.d/app.fact", "{\"tier\": \"web\"}")
            .with_executable("/etc/ansible/facts.d/open_ports.fact", "#!/bin/sh\n")
            .with_dir("/etc/ansible/facts.d/nested.fact");
        let runner = StubRunner::new()
            .with_output(
                "/etc/ansible/facts.d/open_ports.fact",
                crate::facts::CommandOutput::failed(1, "boom"),
            );
        let ctx = ProbeContext::new(
            Arc::new(PlatformIdentity::unknown()),
            Arc::new(runner),
            Arc::new(reader),
            ProbeDeadline::unbounded(),
        );

        let mut fragment = Fragment::new();
        CustomFactsProbe::new(DEFAULT_FACT_PATH)
            .collect(&ctx, &mut fragment)
            .await
            .unwrap();

        assert_eq!(
            fragment.facts.get_path("local.app.tier").and_then(FactValue::as_str),
            Some("web")
        );
        assert_eq!(
            fragment.facts.get_path("local.open_ports").and_then(FactValue::as_str),
            Some(LOAD_ERROR)
        );
        assert!(fragment.facts.get_path("local.nested").is_none());
        assert!(fragment
            .failures
            .iter()
            .any(|f| matches!(f, SoftFailure::ParseMismatch { detail, .. } if detail.contains("status 1"))));
    }
}
