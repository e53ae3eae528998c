//! Configuration schema definitions.
//!
//! This module contains the struct definitions that map to the YAML
//! pipeline configuration format.

use serde::{Deserialize, Serialize};

/// Root configuration structure for a pipeline file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Namespace the run writes to (may be overridden on the command line)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Run identifier (generated when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// Conflict retry policy shared by every step
    pub retry: RetryConfig,

    /// Maximum number of steps executing at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Release image stream imported into the stable stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseConfig>,

    /// Base images tagged into the pipeline stream
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_images: Vec<InputImageTagStepConfiguration>,

    /// Pipeline images promoted to output tags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputImageTagStepConfiguration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            run_id: None,
            retry: RetryConfig::default(),
            max_parallel: default_max_parallel(),
            release: None,
            input_images: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

fn default_max_parallel() -> usize {
    4
}

/// Bounded retry with exponential backoff for update conflicts.
///
/// Defaults match the client-go default retry: 5 attempts, 10ms, factor 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of update attempts
    pub steps: u32,

    /// Delay before the second attempt
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay after each attempt
    pub factor: f64,

    /// Upper bound on a single delay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            steps: 5,
            initial_delay_ms: 10,
            factor: 1.0,
            max_delay_ms: None,
        }
    }
}

/// Points at `namespace/name:tag`, optionally exporting it under a name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStreamTagReference {
    /// Empty means the run namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    pub name: String,

    pub tag: String,

    /// Name to publish the tag under; absent means nothing is exported
    #[serde(
        default,
        rename = "as",
        alias = "exportAs",
        skip_serializing_if = "Option::is_none"
    )]
    pub export_as: Option<String>,
}

/// Promote a pipeline image to an image stream tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputImageTagStepConfiguration {
    /// Tag in the pipeline stream to promote
    pub from: String,

    /// Destination tag
    pub to: ImageStreamTagReference,
}

/// Tag an external base image into the pipeline stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputImageTagStepConfiguration {
    /// Source image stream tag
    pub from: ImageStreamTagReference,

    /// Tag created in the pipeline stream
    #[serde(rename = "as")]
    pub to: String,
}

/// Release payload image stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    pub namespace: String,
    pub name: String,
}
