//! Graph command implementation.
//!
//! The `tagflow graph` command prints the steps of a pipeline grouped into
//! layers that may execute concurrently.

use std::io::Write;
use std::sync::Arc;

use crate::api::RunContext;
use crate::cli::args::GraphArgs;
use crate::config::load_config_file;
use crate::error::Result;
use crate::runner::PipelineRunner;
use crate::steps::TagReconciler;
use crate::store::MemoryStore;

use super::dispatcher::{Command, CommandResult};

/// Shown in descriptions when no namespace is configured.
const NAMESPACE_PLACEHOLDER: &str = "<namespace>";

/// The graph command implementation.
pub struct GraphCommand {
    args: GraphArgs,
}

impl GraphCommand {
    pub fn new(args: GraphArgs) -> Self {
        Self { args }
    }
}

impl Command for GraphCommand {
    fn execute(&self, out: &mut dyn Write) -> Result<CommandResult> {
        let config = load_config_file(&self.args.config)?;
        let namespace = self
            .args
            .namespace
            .clone()
            .or_else(|| config.namespace.clone())
            .unwrap_or_else(|| NAMESPACE_PLACEHOLDER.to_string());

        // Nothing runs, so an empty in-memory store stands in for the real one.
        let reconciler = Arc::new(TagReconciler::new(Arc::new(MemoryStore::new())));
        let context = Arc::new(RunContext::new(namespace, "graph"));
        let runner = PipelineRunner::from_config(&config, reconciler, context)?;

        let graph = runner.graph();
        for (index, layer) in graph.parallel_groups().iter().enumerate() {
            writeln!(out, "Layer {}:", index + 1)?;
            for name in layer {
                let description = runner
                    .step(name)
                    .map(|s| s.description())
                    .unwrap_or_default();
                writeln!(out, "  {} - {}", name, description)?;
                if let Some(deps) = graph.dependencies_of(name).filter(|d| !d.is_empty()) {
                    let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                    writeln!(out, "    after: {}", deps.join(", "))?;
                }
            }
        }

        Ok(CommandResult::success())
    }
}
