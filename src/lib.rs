//! tagflow - Image stream tag reconciliation as a step pipeline.
//!
//! A pipeline is a set of [`steps::Step`]s. Each step declares the links it
//! requires and creates; the [`runner`] derives a dependency graph from
//! those links and runs steps concurrently once their producers succeed.
//! Steps write image stream tags through the create-or-update reconciler,
//! skip work whose effect is already in place, and publish lazily resolved
//! parameters for later consumers.
//!
//! # Modules
//!
//! - [`api`] - Links, run context and deferred parameters
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Pipeline configuration loading and validation
//! - [`error`] - Error types and result aliases
//! - [`runner`] - Dependency graph and concurrent execution
//! - [`steps`] - Step contract, step kinds and reconciliation
//! - [`store`] - Image store abstraction with memory and file backends
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tagflow::api::RunContext;
//! use tagflow::config::parse_config;
//! use tagflow::runner::{PipelineRunner, RunOptions};
//! use tagflow::steps::TagReconciler;
//! use tagflow::store::MemoryStore;
//! use std::path::Path;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.tag_image("ocp", "4.0", "cli", "sha256:cli");
//! store.tag_image("ci", "base", "4.0", "sha256:base");
//!
//! let config = parse_config(
//!     r#"
//! release: { namespace: ocp, name: "4.0" }
//! input_images:
//!   - from: { namespace: ci, name: base, tag: "4.0" }
//!     as: root
//! outputs:
//!   - from: root
//!     to: { name: stable, tag: latest }
//! "#,
//!     Path::new("pipeline.yml"),
//! )
//! .unwrap();
//!
//! let context = Arc::new(RunContext::new("ci-op", "run_1"));
//! let reconciler = Arc::new(TagReconciler::new(store));
//! let runner = PipelineRunner::from_config(&config, reconciler, context).unwrap();
//! let result = runner.run(&RunOptions::default());
//! assert!(result.success);
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod runner;
pub mod steps;
pub mod store;

pub use error::{Result, TagflowError};
