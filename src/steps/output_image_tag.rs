//! Promote a pipeline image to an output image stream tag.

use std::sync::Arc;

use tracing::{debug, info};

use super::reconcile::{render, tag_matches, TagReconciler};
use super::{image_parameter_name, InputDefinition, Step, DRY_RUN_DIGEST};
use crate::api::{provider, ParameterMap, RunContext, StepLink};
use crate::config::OutputImageTagStepConfiguration;
use crate::error::{Result, TagflowError};
use crate::store::{ImageStreamTag, ObjectMeta, TagReference, PIPELINE_IMAGE_STREAM};

/// Tags `pipeline:<from>` as `<to.namespace>/<to.name>:<to.tag>`.
///
/// When the target carries an `as` name the image's pull spec is published
/// as `IMAGE_<AS>` and the step also satisfies `pipeline:<as>` for later
/// steps.
pub struct OutputImageTagStep {
    config: OutputImageTagStepConfiguration,
    reconciler: Arc<TagReconciler>,
    context: Arc<RunContext>,
}

impl OutputImageTagStep {
    pub fn new(
        config: OutputImageTagStepConfiguration,
        reconciler: Arc<TagReconciler>,
        context: Arc<RunContext>,
    ) -> Self {
        Self {
            config,
            reconciler,
            context,
        }
    }

    /// Target namespace: configured, or the run's namespace.
    fn namespace(&self) -> &str {
        if self.config.to.namespace.is_empty() {
            self.context.namespace()
        } else {
            &self.config.to.namespace
        }
    }

    fn target_name(&self) -> String {
        format!("{}:{}", self.config.to.name, self.config.to.tag)
    }

    fn source_name(&self) -> String {
        format!("{}:{}", PIPELINE_IMAGE_STREAM, self.config.from)
    }

    fn resolve_source(&self) -> Result<String> {
        self.reconciler
            .resolve_image(self.context.namespace(), &self.source_name())
    }

    fn desired(&self, digest: &str) -> ImageStreamTag {
        ImageStreamTag {
            metadata: ObjectMeta::new(self.namespace(), self.target_name()),
            tag: Some(TagReference::image_stream_image(
                self.context.namespace(),
                PIPELINE_IMAGE_STREAM,
                digest,
            )),
            ..Default::default()
        }
    }
}

impl Step for OutputImageTagStep {
    fn name(&self) -> String {
        match &self.config.to.export_as {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("[output:{}:{}]", self.config.to.name, self.config.to.tag),
        }
    }

    fn description(&self) -> String {
        match &self.config.to.export_as {
            Some(name) if !name.is_empty() => format!(
                "Tag the image {} into the image stream tag {}/{} and expose it as {}",
                self.config.from,
                self.namespace(),
                self.target_name(),
                name
            ),
            _ => format!(
                "Tag the image {} into the image stream tag {}/{}",
                self.config.from,
                self.namespace(),
                self.target_name()
            ),
        }
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![
            StepLink::internal_image(&self.config.from),
            StepLink::release_images(),
        ]
    }

    fn creates(&self) -> Vec<StepLink> {
        let mut links = vec![StepLink::external_image(
            &self.config.to.namespace,
            &self.config.to.name,
            &self.config.to.tag,
        )];
        if let Some(name) = self.config.to.export_as.as_deref().filter(|n| !n.is_empty()) {
            links.push(StepLink::internal_image(name));
        }
        links
    }

    fn provides(&self) -> (ParameterMap, Option<StepLink>) {
        let Some(export) = self.config.to.export_as.clone().filter(|n| !n.is_empty()) else {
            return (ParameterMap::new(), None);
        };

        // Hangs off the tag the provider reads, not the exported name.
        let link = StepLink::external_image(
            &self.config.to.namespace,
            &self.config.to.name,
            &self.config.to.tag,
        );
        let parameter = image_parameter_name(&export);
        let reconciler = Arc::clone(&self.reconciler);
        let namespace = self.namespace().to_string();
        let stream = self.config.to.name.clone();
        let tag = self.config.to.tag.clone();
        let name = parameter.clone();

        let mut params = ParameterMap::new();
        params.insert(
            parameter,
            provider(move || {
                let is = reconciler
                    .store()
                    .get_stream(&namespace, &stream)
                    .map_err(|e| TagflowError::ParameterResolution {
                        name: name.clone(),
                        message: format!("could not retrieve output imagestream: {}", e),
                    })?;
                let registry = is.registry().ok_or_else(|| TagflowError::ParameterResolution {
                    name: name.clone(),
                    message: format!("image stream {} has no accessible image registry value", export),
                })?;
                Ok(format!("{}:{}", registry, tag))
            }),
        );
        (params, Some(link))
    }

    fn inputs(&self, _dry_run: bool) -> Result<InputDefinition> {
        Ok(Vec::new())
    }

    fn run(&self, dry_run: bool) -> Result<()> {
        info!(
            "Tagging {} into {}/{}",
            self.config.from,
            self.namespace(),
            self.target_name()
        );

        if dry_run {
            // The source is produced earlier in this run and was never
            // written, so there is nothing real to resolve.
            return render(&self.context, &self.desired(DRY_RUN_DIGEST));
        }

        let digest = self.resolve_source()?;
        self.reconciler
            .apply(&self.desired(&digest), self.context.cancellation())
    }

    fn done(&self) -> Result<bool> {
        debug!(
            "Checking for existence of {}/{}",
            self.namespace(),
            self.target_name()
        );
        let Some(actual) = self
            .reconciler
            .fetch_existing(self.namespace(), &self.target_name())?
        else {
            return Ok(false);
        };

        // Re-resolved on every check: the upstream tag may have moved.
        let digest = self.resolve_source()?;
        Ok(tag_matches(&actual, &self.desired(&digest)))
    }
}
