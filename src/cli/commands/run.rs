//! Run command implementation.
//!
//! The `tagflow run` command executes a pipeline against a file-backed
//! image store.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, info};

use crate::api::RunContext;
use crate::cli::args::RunArgs;
use crate::config::{load_config_file, PipelineConfig};
use crate::error::{Result, TagflowError};
use crate::runner::{PipelineRunner, RunOptions};
use crate::steps::{RetryPolicy, TagReconciler};
use crate::store::FileStore;

use super::dispatcher::{Command, CommandResult};

/// The run command implementation.
pub struct RunCommand {
    args: RunArgs,
}

impl RunCommand {
    /// Create a new run command.
    pub fn new(args: RunArgs) -> Self {
        Self { args }
    }

    /// Get the command arguments.
    pub fn args(&self) -> &RunArgs {
        &self.args
    }

    /// Build run options from args, falling back to the config file.
    fn build_options(&self, config: &PipelineConfig) -> RunOptions {
        RunOptions {
            dry_run: self.args.dry_run,
            force: self.args.force.iter().cloned().collect(),
            max_parallel: self.args.max_parallel.unwrap_or(config.max_parallel),
        }
    }

    fn build_context(&self, config: &PipelineConfig) -> Result<RunContext> {
        let namespace = self
            .args
            .namespace
            .clone()
            .or_else(|| config.namespace.clone())
            .ok_or_else(|| TagflowError::ConfigValidationError {
                message: "no namespace: set 'namespace' in the config or pass --namespace"
                    .to_string(),
            })?;

        Ok(match self.args.run_id.clone().or_else(|| config.run_id.clone()) {
            Some(run_id) => RunContext::new(namespace, run_id),
            None => RunContext::with_generated_id(namespace),
        })
    }
}

impl Command for RunCommand {
    fn execute(&self, out: &mut dyn Write) -> Result<CommandResult> {
        let config = load_config_file(&self.args.config)?;
        let context = Arc::new(self.build_context(&config)?);
        let store = Arc::new(FileStore::open(&self.args.state)?);
        debug!("Using state file {}", store.path().display());
        let reconciler = Arc::new(
            TagReconciler::new(store).with_policy(RetryPolicy::from(&config.retry)),
        );
        let runner = PipelineRunner::from_config(&config, reconciler, Arc::clone(&context))?;

        for name in &self.args.force {
            if runner.step(name).is_none() {
                return Err(TagflowError::ConfigValidationError {
                    message: format!("--force names unknown step '{}'", name),
                });
            }
        }

        info!(
            "Running pipeline {} in namespace {}",
            context.run_id(),
            context.namespace()
        );
        let result = runner.run(&self.build_options(&config));

        for step in &result.steps {
            writeln!(out, "{}", step.summary_line())?;
        }

        if !result.success {
            writeln!(
                out,
                "{} of {} steps did not complete",
                result.failures().len(),
                result.steps.len()
            )?;
            return Ok(CommandResult::failure(1));
        }

        let outputs = runner.outputs();
        for name in &self.args.params {
            writeln!(out, "{}={}", name, outputs.get(name)?)?;
        }

        Ok(CommandResult::success())
    }
}
