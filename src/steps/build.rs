//! Turn a pipeline configuration into steps.

use std::sync::Arc;

use super::{InputImageTagStep, OutputImageTagStep, ReleaseImagesTagStep, Step, TagReconciler};
use crate::api::RunContext;
use crate::config::PipelineConfig;

/// One step per configured release, input image and output, in that order.
pub fn build_steps(
    config: &PipelineConfig,
    reconciler: &Arc<TagReconciler>,
    context: &Arc<RunContext>,
) -> Vec<Arc<dyn Step>> {
    let mut steps: Vec<Arc<dyn Step>> = Vec::new();

    if let Some(release) = &config.release {
        steps.push(Arc::new(ReleaseImagesTagStep::new(
            release.clone(),
            Arc::clone(reconciler),
            Arc::clone(context),
        )));
    }
    for input in &config.input_images {
        steps.push(Arc::new(InputImageTagStep::new(
            input.clone(),
            Arc::clone(reconciler),
            Arc::clone(context),
        )));
    }
    for output in &config.outputs {
        steps.push(Arc::new(OutputImageTagStep::new(
            output.clone(),
            Arc::clone(reconciler),
            Arc::clone(context),
        )));
    }

    steps
}
