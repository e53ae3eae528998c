//! Import a release payload into the run's `stable` image stream.

use std::sync::Arc;

use tracing::{debug, info};

use super::reconcile::{render, tag_matches, TagReconciler};
use super::{InputDefinition, Step};
use crate::api::{provider, ParameterMap, RunContext, StepLink};
use crate::config::ReleaseConfig;
use crate::error::{Operation, Result, TagflowError};
use crate::store::{ImageStreamTag, ObjectMeta, TagReference, STABLE_IMAGE_STREAM};

/// Parameter holding the pull spec template for release components.
pub const IMAGE_FORMAT: &str = "IMAGE_FORMAT";

/// Placeholder consumers substitute with a component name.
pub const COMPONENT_PLACEHOLDER: &str = "${component}";

/// Tags every image of a release stream into `stable:<tag>`.
pub struct ReleaseImagesTagStep {
    config: ReleaseConfig,
    reconciler: Arc<TagReconciler>,
    context: Arc<RunContext>,
}

impl ReleaseImagesTagStep {
    pub fn new(
        config: ReleaseConfig,
        reconciler: Arc<TagReconciler>,
        context: Arc<RunContext>,
    ) -> Self {
        Self {
            config,
            reconciler,
            context,
        }
    }

    /// One desired `stable:<tag>` per tag in the release stream's status.
    fn desired_tags(&self) -> Result<Vec<ImageStreamTag>> {
        let release = self
            .reconciler
            .store()
            .get_stream(&self.config.namespace, &self.config.name)
            .map_err(|e| {
                TagflowError::store(
                    Operation::ResolveSource,
                    format!("{}/{}", self.config.namespace, self.config.name),
                    e,
                )
            })?;

        Ok(release
            .status
            .tags
            .iter()
            .filter(|t| !t.image.is_empty())
            .map(|t| ImageStreamTag {
                metadata: ObjectMeta::new(
                    self.context.namespace(),
                    format!("{}:{}", STABLE_IMAGE_STREAM, t.tag),
                ),
                tag: Some(TagReference::image_stream_image(
                    &self.config.namespace,
                    &self.config.name,
                    &t.image,
                )),
                ..Default::default()
            })
            .collect())
    }
}

impl Step for ReleaseImagesTagStep {
    fn name(&self) -> String {
        "[release-inputs]".to_string()
    }

    fn description(&self) -> String {
        format!(
            "Find all of the input images from {}/{} and tag them into the output image stream",
            self.config.namespace, self.config.name
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::release_images()]
    }

    fn provides(&self) -> (ParameterMap, Option<StepLink>) {
        let reconciler = Arc::clone(&self.reconciler);
        let namespace = self.context.namespace().to_string();

        let mut params = ParameterMap::new();
        params.insert(
            IMAGE_FORMAT.to_string(),
            provider(move || {
                let is = reconciler
                    .store()
                    .get_stream(&namespace, STABLE_IMAGE_STREAM)
                    .map_err(|e| TagflowError::ParameterResolution {
                        name: IMAGE_FORMAT.to_string(),
                        message: format!("could not retrieve output imagestream: {}", e),
                    })?;
                let registry = is.registry().ok_or_else(|| TagflowError::ParameterResolution {
                    name: IMAGE_FORMAT.to_string(),
                    message: format!(
                        "image stream {} has no accessible image registry value",
                        STABLE_IMAGE_STREAM
                    ),
                })?;
                Ok(format!("{}:{}", registry, COMPONENT_PLACEHOLDER))
            }),
        );
        (params, Some(StepLink::release_images()))
    }

    fn inputs(&self, _dry_run: bool) -> Result<InputDefinition> {
        Ok(self
            .desired_tags()?
            .into_iter()
            .filter_map(|ist| ist.tag.and_then(|t| t.from).map(|from| from.name))
            .collect())
    }

    fn run(&self, dry_run: bool) -> Result<()> {
        info!(
            "Tagging release images from {}/{}",
            self.config.namespace, self.config.name
        );
        let desired = self.desired_tags()?;
        for ist in &desired {
            if dry_run {
                render(&self.context, ist)?;
            } else {
                self.reconciler.apply(ist, self.context.cancellation())?;
            }
        }
        debug!("Reconciled {} release tags", desired.len());
        Ok(())
    }

    fn done(&self) -> Result<bool> {
        for desired in self.desired_tags()? {
            match self
                .reconciler
                .fetch_existing(&desired.metadata.namespace, &desired.metadata.name)?
            {
                Some(actual) if tag_matches(&actual, &desired) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}
