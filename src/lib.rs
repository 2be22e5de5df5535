//! Rustle Facts - host fact collection engine
//!
//! Inspects the managed host it runs on and returns a structured snapshot of
//! its hardware, network configuration, virtualization status and OS
//! identity. Every probe is bounded by its own deadline, and a missing tool
//! or unexpected output only removes the fields it would have produced.

pub mod config;
pub mod facts;
pub mod output;

pub use config::CollectorConfig;
pub use facts::{Collection, FactAggregator, FactSet, FactValue, PlatformIdentity};
pub use output::{Envelope, OutputFormat};
