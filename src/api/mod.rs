//! Value types shared by steps and the runner.
//!
//! - [`StepLink`] - Identity of a resource a step produces or consumes
//! - [`RunContext`] - Read-only per-run settings handed to every step
//! - [`ParameterMap`] / [`OutputTable`] - Deferred values published by steps

pub mod context;
pub mod link;
pub mod params;

pub use context::{CancellationToken, DiagnosticSink, RunContext};
pub use link::StepLink;
pub use params::{provider, OutputTable, ParameterMap, ParameterProvider};
