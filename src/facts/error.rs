//! Fact collection errors and soft-failure diagnostics

use super::FactCategory;
use serde::Serialize;
use std::time::Duration;

/// Errors that stop a probe (or, for hard errors, the whole collection).
#[derive(thiserror::Error, Debug)]
pub enum FactError {
    #[error("Timeout collecting facts after {}ms", after.as_millis())]
    Timeout { after: Duration },

    #[error("System resources exhausted during {operation}: {source}")]
    ResourceExhausted {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl FactError {
    /// Hard errors propagate out of the engine; everything else is absorbed
    /// by the probe that hit it.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            FactError::ResourceExhausted { .. } | FactError::Config(_)
        )
    }

    /// Classifies an I/O error raised while spawning or opening.
    pub fn from_io(operation: impl Into<String>, source: std::io::Error) -> Self {
        if is_exhaustion(&source) {
            FactError::ResourceExhausted {
                operation: operation.into(),
                source,
            }
        } else {
            FactError::Io(source)
        }
    }
}

/// Process table or descriptor table full.
pub(crate) fn is_exhaustion(err: &std::io::Error) -> bool {
    if matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::OutOfMemory
    ) {
        return true;
    }
    // ENFILE and EMFILE
    matches!(err.raw_os_error(), Some(23) | Some(24))
}

/// A condition that removed or defaulted some facts without aborting
/// collection.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SoftFailure {
    #[error("tool unavailable: {tool}")]
    ToolUnavailable { tool: String },

    #[error("unexpected output from {origin}: {detail}")]
    ParseMismatch { origin: String, detail: String },

    #[error("probe timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("no implementation for platform {family}")]
    UnsupportedPlatform { family: String },
}

impl SoftFailure {
    pub fn parse(origin: impl Into<String>, detail: impl Into<String>) -> Self {
        SoftFailure::ParseMismatch {
            origin: origin.into(),
            detail: detail.into(),
        }
    }

    pub fn tool(tool: impl Into<String>) -> Self {
        SoftFailure::ToolUnavailable { tool: tool.into() }
    }
}

/// A soft failure attributed to the probe that recorded it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub category: FactCategory,
    pub probe: String,
    pub failure: SoftFailure,
}
