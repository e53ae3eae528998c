//! Error types for tagflow operations.
//!
//! This module defines [`TagflowError`], the primary error type used throughout
//! the crate, the [`Operation`] tag attached to every fatal step error, and a
//! [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Remote store failures arrive as [`StoreError`] and are wrapped together
//!   with the operation that was attempted
//! - Absence during a completion check is not an error; callers inspect
//!   [`StoreError::is_not_found`] before wrapping
//! - Use `anyhow::Error` (via `TagflowError::Other`) for unexpected errors

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub use crate::store::StoreError;

/// The operation a fatal step error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Dereferencing a source tag to its backing image.
    ResolveSource,
    /// Creating the desired resource.
    Create,
    /// Updating an existing resource.
    Update,
    /// Reading the target resource during a completion check.
    FetchForCompletion,
    /// Invoking a parameter provider.
    ResolveParameter,
    /// Rendering a dry-run resource.
    Render,
}

impl Operation {
    /// Stable, kebab-case name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ResolveSource => "resolve-source",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::FetchForCompletion => "fetch-for-completion",
            Operation::ResolveParameter => "resolve-parameter",
            Operation::Render => "render",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for tagflow operations.
#[derive(Debug, Error)]
pub enum TagflowError {
    /// Configuration file not found at expected location.
    #[error("Configuration not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Failed to parse configuration file.
    #[error("Failed to parse config at {path}: {message}")]
    ConfigParseError { path: PathBuf, message: String },

    /// Invalid configuration structure or values.
    #[error("Invalid configuration: {message}")]
    ConfigValidationError { message: String },

    /// Step dependency cycle detected.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    /// A step requires a link no other step creates.
    #[error("Step '{step}' requires {link}, which no step creates")]
    UnresolvedRequirement { step: String, link: String },

    /// Two steps share a name.
    #[error("Duplicate step name: {name}")]
    DuplicateStep { name: String },

    /// A remote store call failed.
    #[error("{operation} {target} failed: {source}")]
    Store {
        operation: Operation,
        target: String,
        #[source]
        source: StoreError,
    },

    /// Conflicts persisted past the retry bound.
    #[error("{operation} {target} still conflicting after {attempts} attempts: {last}")]
    RetryExhausted {
        operation: Operation,
        target: String,
        attempts: u32,
        last: StoreError,
    },

    /// A parameter provider could not produce its value.
    #[error("Could not resolve parameter {name}: {message}")]
    ParameterResolution { name: String, message: String },

    /// A dry-run resource could not be rendered.
    #[error("Could not render {target}: {message}")]
    Render { target: String, message: String },

    /// The run was cancelled before or during this operation.
    #[error("Run cancelled")]
    Cancelled,

    /// One or more steps failed; carries every step-level error.
    #[error("{} step(s) failed: {}", .failures.len(), summarize(.failures))]
    PipelineFailed { failures: Vec<(String, String)> },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(step, message)| format!("{}: {}", step, message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl TagflowError {
    /// Wrap a store error with the operation and target that produced it.
    pub fn store(operation: Operation, target: impl Into<String>, source: StoreError) -> Self {
        TagflowError::Store {
            operation,
            target: target.into(),
            source,
        }
    }

    /// The operation this error was raised from, if it came from one.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            TagflowError::Store { operation, .. } | TagflowError::RetryExhausted { operation, .. } => {
                Some(*operation)
            }
            TagflowError::ParameterResolution { .. } => Some(Operation::ResolveParameter),
            TagflowError::Render { .. } => Some(Operation::Render),
            _ => None,
        }
    }

    /// Whether this error wraps an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TagflowError::Store { source, .. } if source.is_conflict())
    }
}

/// Result type alias for tagflow operations.
pub type Result<T> = std::result::Result<T, TagflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_are_kebab_case() {
        assert_eq!(Operation::ResolveSource.to_string(), "resolve-source");
        assert_eq!(Operation::FetchForCompletion.to_string(), "fetch-for-completion");
        assert_eq!(Operation::ResolveParameter.to_string(), "resolve-parameter");
    }

    #[test]
    fn store_error_displays_operation_and_target() {
        let err = TagflowError::store(
            Operation::Create,
            "ns/stable:latest",
            StoreError::Io("connection refused".into()),
        );
        let msg = err.to_string();
        assert!(msg.contains("create"));
        assert!(msg.contains("ns/stable:latest"));
        assert!(msg.contains("connection refused"));
        assert_eq!(err.operation(), Some(Operation::Create));
    }

    #[test]
    fn conflict_is_detected_through_wrapper() {
        let err = TagflowError::store(
            Operation::Update,
            "ns/stable:latest",
            StoreError::Conflict {
                name: "stable:latest".into(),
            },
        );
        assert!(err.is_conflict());

        let other = TagflowError::store(
            Operation::Update,
            "ns/stable:latest",
            StoreError::Io("boom".into()),
        );
        assert!(!other.is_conflict());
    }

    #[test]
    fn retry_exhausted_is_tagged_with_update() {
        let err = TagflowError::RetryExhausted {
            operation: Operation::Update,
            target: "ns/stable:latest".into(),
            attempts: 5,
            last: StoreError::Conflict {
                name: "stable:latest".into(),
            },
        };
        assert_eq!(err.operation(), Some(Operation::Update));
        assert!(err.to_string().contains("5 attempts"));
    }

    #[test]
    fn parameter_resolution_is_tagged() {
        let err = TagflowError::ParameterResolution {
            name: "IMAGE_FOO".into(),
            message: "no registry".into(),
        };
        assert_eq!(err.operation(), Some(Operation::ResolveParameter));
        assert!(err.to_string().contains("IMAGE_FOO"));
    }

    #[test]
    fn pipeline_failed_lists_every_failure() {
        let err = TagflowError::PipelineFailed {
            failures: vec![
                ("a".into(), "first".into()),
                ("b".into(), "second".into()),
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 step(s) failed"));
        assert!(msg.contains("a: first"));
        assert!(msg.contains("b: second"));
    }

    #[test]
    fn circular_dependency_displays_cycle() {
        let err = TagflowError::CircularDependency {
            cycle: "a -> b -> a".into(),
        };
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn io_error_converts_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: TagflowError = io_err.into();
        assert!(matches!(err, TagflowError::Io(_)));
        assert_eq!(err.operation(), None);
    }
}
