//! Pipeline execution orchestration.
//!
//! Steps run on scoped worker threads as soon as every producer of every
//! link they require has succeeded. Results flow back over a channel to the
//! scheduling thread, which publishes parameters, blocks dependents of
//! failed steps, and starts whatever became ready.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::api::{CancellationToken, OutputTable, RunContext};
use crate::config::{validate, PipelineConfig};
use crate::error::{Result, TagflowError};
use crate::steps::{
    build_steps, execute_step, ExecutionOptions, Step, StepResult, StepStatus, TagReconciler,
};

use super::dependency::DependencyGraph;

/// Progress events emitted during pipeline execution.
#[derive(Debug)]
pub enum RunProgress<'a> {
    /// A step is about to start.
    StepStarting { name: &'a str },
    /// A step finished, was blocked, or was cancelled.
    StepFinished {
        name: &'a str,
        result: &'a StepResult,
    },
}

/// Options for running a pipeline.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Render every step instead of writing.
    pub dry_run: bool,
    /// Run these steps even if their work is already done.
    pub force: HashSet<String>,
    /// Maximum number of steps executing at once.
    pub max_parallel: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: HashSet::new(),
            max_parallel: 4,
        }
    }
}

/// Result of running a pipeline.
#[derive(Debug)]
pub struct PipelineResult {
    /// One result per step, in completion order.
    pub steps: Vec<StepResult>,
    /// Total duration.
    pub duration: Duration,
    /// Whether every step completed or was skipped.
    pub success: bool,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl PipelineResult {
    pub fn get(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|r| r.name == name)
    }

    /// `(step, error)` for every step that did not succeed.
    pub fn failures(&self) -> Vec<(String, String)> {
        self.steps
            .iter()
            .filter(|r| !r.status.is_success())
            .map(|r| {
                (
                    r.name.clone(),
                    r.error.clone().unwrap_or_else(|| r.status.to_string()),
                )
            })
            .collect()
    }

    /// Turn any failure into [`TagflowError::PipelineFailed`].
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(TagflowError::PipelineFailed {
                failures: self.failures(),
            })
        }
    }
}

/// Orchestrates the execution of a set of steps.
pub struct PipelineRunner {
    steps: BTreeMap<String, Arc<dyn Step>>,
    graph: DependencyGraph,
    outputs: Arc<OutputTable>,
    cancel: CancellationToken,
}

impl PipelineRunner {
    /// Build the dependency graph for `steps`.
    ///
    /// Fails before anything runs on duplicate names, unresolved
    /// requirements or cycles.
    pub fn new(steps: Vec<Arc<dyn Step>>, cancel: CancellationToken) -> Result<Self> {
        let graph = DependencyGraph::from_steps(&steps)?;
        let steps = steps.into_iter().map(|s| (s.name(), s)).collect();
        Ok(Self {
            steps,
            graph,
            outputs: Arc::new(OutputTable::new()),
            cancel,
        })
    }

    /// Validate `config` and build a runner for its steps.
    ///
    /// Steps share `reconciler` and `context`; the context's cancellation
    /// token stops the run.
    pub fn from_config(
        config: &PipelineConfig,
        reconciler: Arc<TagReconciler>,
        context: Arc<RunContext>,
    ) -> Result<Self> {
        validate(config)?;
        let steps = build_steps(config, &reconciler, &context);
        Self::new(steps, context.cancellation().clone())
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Parameters published by the steps that have succeeded so far.
    pub fn outputs(&self) -> Arc<OutputTable> {
        Arc::clone(&self.outputs)
    }

    pub fn step(&self, name: &str) -> Option<&Arc<dyn Step>> {
        self.steps.get(name)
    }

    /// Run every step.
    pub fn run(&self, options: &RunOptions) -> PipelineResult {
        self.run_with_progress(options, |_| {})
    }

    /// Run every step with a progress callback.
    ///
    /// The callback is invoked on the calling thread.
    pub fn run_with_progress(
        &self,
        options: &RunOptions,
        mut on_progress: impl FnMut(RunProgress<'_>),
    ) -> PipelineResult {
        let start = Instant::now();
        let max_parallel = options.max_parallel.max(1);

        let mut pending: BTreeSet<String> = self.steps.keys().cloned().collect();
        let mut succeeded: HashSet<String> = HashSet::new();
        let mut results: Vec<StepResult> = Vec::with_capacity(self.steps.len());
        let (tx, rx) = mpsc::channel::<StepResult>();
        // Dropped once nothing more can start, so `recv` fails instead of
        // blocking if every worker is gone.
        let mut tx = Some(tx);

        thread::scope(|scope| {
            let mut running = 0usize;
            loop {
                if pending.is_empty() || self.cancel.is_cancelled() {
                    tx = None;
                }
                if let Some(sender) = tx.as_ref().filter(|_| running < max_parallel) {
                    let ready: Vec<String> = pending
                        .iter()
                        .filter(|name| self.graph.is_ready(name, &succeeded))
                        .take(max_parallel - running)
                        .cloned()
                        .collect();

                    for name in ready {
                        pending.remove(&name);
                        let Some(step) = self.steps.get(&name).map(Arc::clone) else {
                            continue;
                        };
                        on_progress(RunProgress::StepStarting { name: &name });

                        let exec = ExecutionOptions {
                            force: options.force.contains(&name),
                            dry_run: options.dry_run,
                        };
                        let cancel = self.cancel.clone();
                        let tx = sender.clone();
                        running += 1;
                        scope.spawn(move || {
                            let started = Instant::now();
                            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                                execute_step(step.as_ref(), &exec, &cancel)
                            }))
                            .unwrap_or_else(|payload| {
                                warn!("Step {} panicked", name);
                                StepResult::panicked(&name, started.elapsed(), payload.as_ref())
                            });
                            // The receiver outlives every worker in this scope.
                            let _ = tx.send(result);
                        });
                    }
                }

                if running == 0 {
                    break;
                }
                let Ok(result) = rx.recv() else {
                    break;
                };
                running -= 1;

                if result.status.is_success() {
                    succeeded.insert(result.name.clone());
                    self.publish(&result.name);
                } else {
                    let blocked: Vec<String> = self
                        .graph
                        .transitive_dependents(&result.name)
                        .into_iter()
                        .filter(|name| pending.remove(name))
                        .collect();
                    for name in blocked {
                        debug!("Blocking {}: {} did not succeed", name, result.name);
                        let blocked = StepResult::blocked(&name, &result.name);
                        on_progress(RunProgress::StepFinished {
                            name: &name,
                            result: &blocked,
                        });
                        results.push(blocked);
                    }
                }

                on_progress(RunProgress::StepFinished {
                    name: &result.name,
                    result: &result,
                });
                results.push(result);
            }
        });

        // Anything still pending was never started because of cancellation.
        for name in pending {
            let result = StepResult::cancelled(&name, Duration::ZERO);
            on_progress(RunProgress::StepFinished {
                name: &name,
                result: &result,
            });
            results.push(result);
        }

        let cancelled = results.iter().any(|r| r.status == StepStatus::Cancelled);
        let success = results.iter().all(|r| r.status.is_success());
        if success {
            info!("Pipeline finished in {:?}", start.elapsed());
        } else {
            warn!(
                "Pipeline finished with {} unsuccessful step(s)",
                results.iter().filter(|r| !r.status.is_success()).count()
            );
        }

        PipelineResult {
            steps: results,
            duration: start.elapsed(),
            success,
            cancelled,
        }
    }

    fn publish(&self, name: &str) {
        let Some(step) = self.steps.get(name) else {
            return;
        };
        if let (params, Some(link)) = step.provides() {
            self.outputs.add_all(params, &link);
        }
    }
}
