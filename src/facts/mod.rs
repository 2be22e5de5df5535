//! System facts collection framework

pub mod collector;
pub mod custom;
pub mod deadline;
pub mod error;
pub mod hardware;
pub mod network;
pub mod platform;
pub mod probe;
pub mod reader;
pub mod runner;
pub mod stub;
pub mod value;
pub mod virtualization;

mod util;

pub use collector::{Collection, FactAggregator, ProbeState};
pub use deadline::ProbeDeadline;
pub use error::{Diagnostic, FactError, SoftFailure};
pub use platform::{Distribution, PlatformFamily, PlatformIdentity};
pub use probe::{FactProbe, Fragment, ProbeContext};
pub use reader::{FileKind, FileReader, SystemFileReader};
pub use runner::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use value::{FactMap, FactSet, FactValue};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fact categories, in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    Distribution,
    Hardware,
    Network,
    Virtualization,
    /// User-supplied facts merged under `local`.
    Custom,
}

impl FactCategory {
    /// Built-in categories a probe table exists for.
    pub const BUILTIN: [FactCategory; 4] = [
        FactCategory::Distribution,
        FactCategory::Hardware,
        FactCategory::Network,
        FactCategory::Virtualization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactCategory::Distribution => "distribution",
            FactCategory::Hardware => "hardware",
            FactCategory::Network => "network",
            FactCategory::Virtualization => "virtual",
            FactCategory::Custom => "local",
        }
    }
}

impl fmt::Display for FactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
