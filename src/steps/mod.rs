//! Pipeline steps and their execution.
//!
//! This module provides the step contract and the built-in step kinds:
//!
//! - [`Step`] - A unit of work with declared links, lazy outputs and a
//!   completion check
//! - [`OutputImageTagStep`] - Promote a pipeline image to an output tag
//! - [`InputImageTagStep`] - Tag an external base image into the pipeline
//! - [`ReleaseImagesTagStep`] - Import a release payload into `stable`
//! - [`execute_step`] - Run one step with its completion check
//! - [`TagReconciler`] - Create-or-update with conflict retry
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tagflow::api::RunContext;
//! use tagflow::config::{ImageStreamTagReference, OutputImageTagStepConfiguration};
//! use tagflow::steps::{execute_step, ExecutionOptions, OutputImageTagStep, StepStatus, TagReconciler};
//! use tagflow::store::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.tag_image("ci-op", "pipeline", "src", "sha256:abc");
//!
//! let context = Arc::new(RunContext::new("ci-op", "run_1"));
//! let step = OutputImageTagStep::new(
//!     OutputImageTagStepConfiguration {
//!         from: "src".into(),
//!         to: ImageStreamTagReference {
//!             name: "stable".into(),
//!             tag: "latest".into(),
//!             ..Default::default()
//!         },
//!     },
//!     Arc::new(TagReconciler::new(store)),
//!     context.clone(),
//! );
//!
//! let result = execute_step(&step, &ExecutionOptions::default(), context.cancellation());
//! assert_eq!(result.status, StepStatus::Completed);
//! ```

pub mod build;
pub mod executor;
pub mod input_image_tag;
pub mod output_image_tag;
pub mod reconcile;
pub mod release_images;

pub use build::build_steps;
pub use executor::{execute_step, ExecutionOptions, StepResult, StepStatus};
pub use input_image_tag::InputImageTagStep;
pub use output_image_tag::OutputImageTagStep;
pub use reconcile::{
    retry_on_conflict, tag_matches, RecordingSleeper, RetryPolicy, Sleeper, TagReconciler,
    ThreadSleeper,
};
pub use release_images::ReleaseImagesTagStep;

use crate::api::{ParameterMap, StepLink};
use crate::error::Result;

/// Digest used in place of a real source image when nothing may be read
/// or written.
pub const DRY_RUN_DIGEST: &str = "dry-fake";

/// Values a step consumes, used for provenance and cache keys.
pub type InputDefinition = Vec<String>;

/// A unit of work in a pipeline.
///
/// Steps declare the links they need and produce; the scheduler orders
/// them so that every producer of a required link finishes first.
pub trait Step: Send + Sync {
    /// Unique, stable name within a pipeline.
    fn name(&self) -> String;

    /// One-line human description.
    fn description(&self) -> String;

    fn requires(&self) -> Vec<StepLink>;

    fn creates(&self) -> Vec<StepLink>;

    /// Lazily evaluated parameters and the link they hang off.
    ///
    /// Calling this never touches the store; the providers do, when invoked.
    fn provides(&self) -> (ParameterMap, Option<StepLink>);

    fn inputs(&self, dry_run: bool) -> Result<InputDefinition>;

    /// Perform the work. In dry-run mode nothing may be written.
    fn run(&self, dry_run: bool) -> Result<()>;

    /// Whether the observable effect of [`Step::run`] is already in place.
    fn done(&self) -> Result<bool>;
}

/// Parameter name an image exported under `name` is published as.
///
/// `my-image` becomes `IMAGE_MY_IMAGE`.
pub fn image_parameter_name(name: &str) -> String {
    format!("IMAGE_{}", name.to_uppercase().replace('-', "_"))
}
