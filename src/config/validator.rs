//! Configuration validation rules.
//!
//! This module validates configuration for correctness:
//! - Names and tags must be non-empty
//! - Exported names must be unique across input and output steps
//! - Two outputs may not target the same tag
//! - The retry policy must allow at least one attempt

use crate::config::schema::PipelineConfig;
use crate::error::{Result, TagflowError};
use std::collections::HashSet;

/// Validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Rule identifier
    pub rule: String,
    /// Human-readable error message
    pub message: String,
}

impl ValidationError {
    fn new(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a configuration and return all errors.
///
/// This function collects all validation errors rather than stopping
/// at the first one, allowing users to fix multiple issues at once.
pub fn validate_config(config: &PipelineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    errors.extend(validate_settings(config));
    errors.extend(validate_inputs(config));
    errors.extend(validate_outputs(config));
    errors.extend(validate_exports(config));

    errors
}

fn validate_settings(config: &PipelineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if matches!(config.namespace.as_deref(), Some(ns) if ns.trim().is_empty()) {
        errors.push(ValidationError::new(
            "empty-namespace",
            "'namespace' must not be empty when set",
        ));
    }
    if config.retry.steps == 0 {
        errors.push(ValidationError::new(
            "retry-steps",
            "'retry.steps' must allow at least one attempt",
        ));
    }
    if !config.retry.factor.is_finite() || config.retry.factor < 1.0 {
        errors.push(ValidationError::new(
            "retry-factor",
            format!("'retry.factor' must be >= 1.0, got {}", config.retry.factor),
        ));
    }
    if config.max_parallel == 0 {
        errors.push(ValidationError::new(
            "max-parallel",
            "'max_parallel' must be at least 1",
        ));
    }
    if let Some(release) = &config.release {
        if release.namespace.is_empty() || release.name.is_empty() {
            errors.push(ValidationError::new(
                "release-stream",
                "'release' needs both 'namespace' and 'name'",
            ));
        }
    }

    errors
}

fn validate_inputs(config: &PipelineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (index, input) in config.input_images.iter().enumerate() {
        if input.from.name.is_empty() || input.from.tag.is_empty() {
            errors.push(ValidationError::new(
                "missing-source",
                format!("input_images[{}] needs 'from.name' and 'from.tag'", index),
            ));
        }
        if input.to.is_empty() {
            errors.push(ValidationError::new(
                "missing-as",
                format!("input_images[{}] needs 'as'", index),
            ));
        }
    }

    errors
}

fn validate_outputs(config: &PipelineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut targets = HashSet::new();

    for (index, output) in config.outputs.iter().enumerate() {
        if output.from.is_empty() {
            errors.push(ValidationError::new(
                "missing-source",
                format!("outputs[{}] needs 'from'", index),
            ));
        }
        if output.to.name.is_empty() || output.to.tag.is_empty() {
            errors.push(ValidationError::new(
                "missing-target",
                format!("outputs[{}] needs 'to.name' and 'to.tag'", index),
            ));
            continue;
        }
        let target = (
            output.to.namespace.clone(),
            output.to.name.clone(),
            output.to.tag.clone(),
        );
        if !targets.insert(target) {
            errors.push(ValidationError::new(
                "duplicate-target",
                format!(
                    "outputs[{}] targets {}:{} which another output already writes",
                    index, output.to.name, output.to.tag
                ),
            ));
        }
    }

    errors
}

fn validate_exports(config: &PipelineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    let names = config
        .input_images
        .iter()
        .map(|i| Some(i.to.as_str()))
        .chain(config.outputs.iter().map(|o| o.to.export_as.as_deref()));

    for name in names.flatten() {
        if name.is_empty() {
            errors.push(ValidationError::new(
                "empty-as",
                "'as' must not be empty when set",
            ));
        } else if !seen.insert(name) {
            errors.push(ValidationError::new(
                "duplicate-as",
                format!("'{}' is used as a name by more than one step", name),
            ));
        }
    }

    errors
}

/// Validate a configuration, combining every problem into one error.
pub fn validate(config: &PipelineConfig) -> Result<()> {
    let errors = validate_config(config);

    if errors.is_empty() {
        Ok(())
    } else {
        let messages: Vec<_> = errors.iter().map(|e| e.message.clone()).collect();
        Err(TagflowError::ConfigValidationError {
            message: messages.join("; "),
        })
    }
}
