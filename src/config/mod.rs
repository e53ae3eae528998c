//! Pipeline configuration loading and validation.
//!
//! - Schema definitions in [`schema`]
//! - File loading in [`loader`]
//! - Validation in [`validator`]
//!
//! # Example
//!
//! ```
//! use tagflow::config::{parse_config, validate};
//! use std::path::Path;
//!
//! let yaml = r#"
//! release: { namespace: ocp, name: "4.0" }
//! outputs:
//!   - from: builder
//!     to: { name: stable, tag: latest }
//! "#;
//! let config = parse_config(yaml, Path::new("pipeline.yml")).unwrap();
//! validate(&config).unwrap();
//! assert_eq!(config.outputs[0].to.tag, "latest");
//! ```

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::{load_config_file, parse_config};
pub use schema::{
    ImageStreamTagReference, InputImageTagStepConfiguration, OutputImageTagStepConfiguration,
    PipelineConfig, ReleaseConfig, RetryConfig,
};
pub use validator::{validate, validate_config, ValidationError};
