//! Step execution engine.
//!
//! Runs one step through its completion check and, when needed, its work,
//! and captures the outcome as a [`StepResult`].

use std::any::Any;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::api::CancellationToken;
use crate::error::{Operation, TagflowError};
use crate::steps::{InputDefinition, Step};

/// Status of a step in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Step ran and succeeded.
    Completed,

    /// Step's effect was already in place.
    Skipped,

    /// Step failed.
    Failed,

    /// A dependency failed, so the step never started.
    Blocked,

    /// The run was cancelled before or during the step.
    Cancelled,
}

impl StepStatus {
    /// Whether dependents may start after this status.
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }

    /// Get a display character for this status.
    pub fn display_char(&self) -> char {
        match self {
            StepStatus::Completed => '✓',
            StepStatus::Skipped => '⊘',
            StepStatus::Failed => '✗',
            StepStatus::Blocked => '⋯',
            StepStatus::Cancelled => '○',
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
            StepStatus::Blocked => "blocked",
            StepStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Result of executing a step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Step name.
    pub name: String,

    pub status: StepStatus,

    /// Execution duration.
    pub duration: Duration,

    /// What the step consumed, when it got far enough to ask.
    pub inputs: InputDefinition,

    /// Error message (if failed or blocked).
    pub error: Option<String>,

    /// Remote operation that failed, when known.
    pub operation: Option<Operation>,
}

impl StepResult {
    fn new(name: &str, status: StepStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            duration: Duration::ZERO,
            inputs: Vec::new(),
            error: None,
            operation: None,
        }
    }

    /// Create a skipped result.
    pub fn skipped(name: &str, duration: Duration) -> Self {
        Self {
            duration,
            ..Self::new(name, StepStatus::Skipped)
        }
    }

    /// Create a success result.
    pub fn success(name: &str, duration: Duration, inputs: InputDefinition) -> Self {
        Self {
            duration,
            inputs,
            ..Self::new(name, StepStatus::Completed)
        }
    }

    /// Create a failure result.
    pub fn failure(name: &str, duration: Duration, error: &TagflowError) -> Self {
        Self {
            duration,
            error: Some(error.to_string()),
            operation: error.operation(),
            ..Self::new(name, StepStatus::Failed)
        }
    }

    /// A step that panicked instead of returning.
    pub fn panicked(name: &str, duration: Duration, payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self {
            duration,
            error: Some(format!("step panicked: {}", message)),
            ..Self::new(name, StepStatus::Failed)
        }
    }

    /// A step that never started because `dependency` did not succeed.
    pub fn blocked(name: &str, dependency: &str) -> Self {
        Self {
            error: Some(format!("dependency '{}' did not complete", dependency)),
            ..Self::new(name, StepStatus::Blocked)
        }
    }

    pub fn cancelled(name: &str, duration: Duration) -> Self {
        Self {
            duration,
            error: Some(TagflowError::Cancelled.to_string()),
            ..Self::new(name, StepStatus::Cancelled)
        }
    }

    /// Generate a summary line for display.
    pub fn summary_line(&self) -> String {
        let c = self.status.display_char();
        match self.status {
            StepStatus::Completed => {
                format!("{} {} ({})", c, self.name, format_duration(self.duration))
            }
            StepStatus::Skipped => format!("{} {} (already complete)", c, self.name),
            StepStatus::Failed | StepStatus::Blocked => {
                let error = self.error.as_deref().unwrap_or("unknown error");
                format!("{} {} - {}", c, self.name, error)
            }
            StepStatus::Cancelled => format!("{} {} (cancelled)", c, self.name),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{}.{}s", secs, millis / 100)
    } else {
        let mins = secs / 60;
        let secs = secs % 60;
        format!("{}m {}s", mins, secs)
    }
}

/// Options for step execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Run even if the completion check says the work is done.
    pub force: bool,

    /// Render instead of writing; the completion check is not consulted.
    pub dry_run: bool,
}

/// Execute a single step.
///
/// Never panics on step errors: every failure is folded into the returned
/// [`StepResult`].
pub fn execute_step(
    step: &dyn Step,
    options: &ExecutionOptions,
    cancel: &CancellationToken,
) -> StepResult {
    let name = step.name();
    let start = Instant::now();

    if cancel.is_cancelled() {
        return StepResult::cancelled(&name, Duration::ZERO);
    }

    // Check if already complete (unless forced)
    if !options.force && !options.dry_run {
        match step.done() {
            Ok(true) => {
                info!("Step {} is already done", name);
                return StepResult::skipped(&name, start.elapsed());
            }
            Ok(false) => debug!("Step {} needs to run", name),
            Err(e) => return fail(&name, start, e),
        }
    }

    let inputs = match step.inputs(options.dry_run) {
        Ok(inputs) => inputs,
        Err(e) => return fail(&name, start, e),
    };

    info!("Executing step {}", name);
    match step.run(options.dry_run) {
        Ok(()) => StepResult::success(&name, start.elapsed(), inputs),
        Err(e) => fail(&name, start, e),
    }
}

fn fail(name: &str, start: Instant, error: TagflowError) -> StepResult {
    if matches!(error, TagflowError::Cancelled) {
        return StepResult::cancelled(name, start.elapsed());
    }
    warn!("Step {} failed: {}", name, error);
    StepResult::failure(name, start.elapsed(), &error)
}
