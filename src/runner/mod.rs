//! Step execution orchestration.

pub mod dependency;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

pub use dependency::DependencyGraph;
pub use pipeline::{PipelineResult, PipelineRunner, RunOptions, RunProgress};
