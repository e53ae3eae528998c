//! Tag an external base image into the pipeline image stream.

use std::sync::Arc;

use tracing::{debug, info};

use super::reconcile::{render, tag_matches, TagReconciler};
use super::{InputDefinition, Step};
use crate::api::{ParameterMap, RunContext, StepLink};
use crate::config::InputImageTagStepConfiguration;
use crate::error::Result;
use crate::store::{ImageStreamTag, ObjectMeta, TagReference, PIPELINE_IMAGE_STREAM};

/// Makes `<from.namespace>/<from.name>:<from.tag>` available as
/// `pipeline:<as>` in the run namespace.
pub struct InputImageTagStep {
    config: InputImageTagStepConfiguration,
    reconciler: Arc<TagReconciler>,
    context: Arc<RunContext>,
}

impl InputImageTagStep {
    pub fn new(
        config: InputImageTagStepConfiguration,
        reconciler: Arc<TagReconciler>,
        context: Arc<RunContext>,
    ) -> Self {
        Self {
            config,
            reconciler,
            context,
        }
    }

    fn source_namespace(&self) -> &str {
        if self.config.from.namespace.is_empty() {
            self.context.namespace()
        } else {
            &self.config.from.namespace
        }
    }

    fn source_name(&self) -> String {
        format!("{}:{}", self.config.from.name, self.config.from.tag)
    }

    fn target_name(&self) -> String {
        format!("{}:{}", PIPELINE_IMAGE_STREAM, self.config.to)
    }

    fn resolve_source(&self) -> Result<String> {
        self.reconciler
            .resolve_image(self.source_namespace(), &self.source_name())
    }

    fn desired(&self, digest: &str) -> ImageStreamTag {
        ImageStreamTag {
            metadata: ObjectMeta::new(self.context.namespace(), self.target_name()),
            tag: Some(TagReference::image_stream_image(
                self.source_namespace(),
                &self.config.from.name,
                digest,
            )),
            ..Default::default()
        }
    }
}

impl Step for InputImageTagStep {
    fn name(&self) -> String {
        format!("[input:{}]", self.config.to)
    }

    fn description(&self) -> String {
        format!(
            "Find the input image {}/{} and tag it into the pipeline",
            self.source_namespace(),
            self.source_name()
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::internal_image(&self.config.to)]
    }

    fn provides(&self) -> (ParameterMap, Option<StepLink>) {
        (ParameterMap::new(), None)
    }

    /// The digest the source currently resolves to.
    fn inputs(&self, _dry_run: bool) -> Result<InputDefinition> {
        Ok(vec![self.resolve_source()?])
    }

    fn run(&self, dry_run: bool) -> Result<()> {
        info!(
            "Tagging {}/{} into {}",
            self.source_namespace(),
            self.source_name(),
            self.target_name()
        );

        // The source exists before the run starts, so reading it is safe
        // even when nothing may be written.
        let digest = self.resolve_source()?;
        let desired = self.desired(&digest);
        if dry_run {
            return render(&self.context, &desired);
        }
        self.reconciler.apply(&desired, self.context.cancellation())
    }

    fn done(&self) -> Result<bool> {
        debug!(
            "Checking for existence of {}/{}",
            self.context.namespace(),
            self.target_name()
        );
        let Some(actual) = self
            .reconciler
            .fetch_existing(self.context.namespace(), &self.target_name())?
        else {
            return Ok(false);
        };
        let digest = self.resolve_source()?;
        Ok(tag_matches(&actual, &self.desired(&digest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageStreamTagReference;
    use crate::error::Operation;
    use crate::steps::fixtures::{fixture, Fixture, NAMESPACE};
    use crate::store::ImageStore;

    fn step(f: &Fixture, namespace: &str) -> InputImageTagStep {
        InputImageTagStep::new(
            InputImageTagStepConfiguration {
                from: ImageStreamTagReference {
                    namespace: namespace.to_string(),
                    name: "base".to_string(),
                    tag: "4.0".to_string(),
                    export_as: None,
                },
                to: "root".to_string(),
            },
            f.reconciler.clone(),
            f.context.clone(),
        )
    }

    #[test]
    fn declares_links_and_name() {
        let f = fixture();
        let s = step(&f, "ci");
        assert_eq!(s.name(), "[input:root]");
        assert_eq!(
            s.description(),
            "Find the input image ci/base:4.0 and tag it into the pipeline"
        );
        assert!(s.requires().is_empty());
        assert_eq!(s.creates(), vec![StepLink::internal_image("root")]);
        let (params, link) = s.provides();
        assert!(params.is_empty());
        assert!(link.is_none());
    }

    #[test]
    fn run_tags_source_into_pipeline() {
        let f = fixture();
        f.store.tag_image("ci", "base", "4.0", "sha256:base");
        let s = step(&f, "ci");
        assert!(!s.done().unwrap());

        s.run(false).unwrap();

        let ist = f.store.get_tag(NAMESPACE, "pipeline:root").unwrap();
        assert_eq!(ist.image.name, "sha256:base");
        let from = ist.tag.unwrap().from.unwrap();
        assert_eq!(from.name, "base@sha256:base");
        assert_eq!(from.namespace, "ci");
        assert!(s.done().unwrap());
    }

    #[test]
    fn empty_source_namespace_means_run_namespace() {
        let f = fixture();
        f.store.tag_image(NAMESPACE, "base", "4.0", "sha256:local");
        step(&f, "").run(false).unwrap();
        assert_eq!(
            f.store.get_tag(NAMESPACE, "pipeline:root").unwrap().image.name,
            "sha256:local"
        );
    }

    #[test]
    fn inputs_report_source_digest() {
        let f = fixture();
        f.store.tag_image("ci", "base", "4.0", "sha256:base");
        assert_eq!(step(&f, "ci").inputs(false).unwrap(), vec!["sha256:base"]);
    }

    #[test]
    fn dry_run_reads_source_but_writes_nothing() {
        let f = fixture();
        f.store.tag_image("ci", "base", "4.0", "sha256:base");
        step(&f, "ci").run(true).unwrap();

        assert_eq!(f.store.calls().writes(), 0);
        assert!(f.diagnostics.contents().contains("base@sha256:base"));
    }

    #[test]
    fn missing_source_is_a_resolve_error() {
        let f = fixture();
        let err = step(&f, "ci").run(false).unwrap_err();
        assert_eq!(err.operation(), Some(Operation::ResolveSource));
    }
}
