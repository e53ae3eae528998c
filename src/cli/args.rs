//! CLI argument definitions.
//!
//! This module defines all CLI arguments using clap's derive macros.
//! The main entry point is the [`Cli`] struct.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tagflow - Reconcile image stream tags as a dependency-ordered pipeline.
#[derive(Debug, Parser)]
#[command(name = "tagflow")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the pipeline against an image store
    Run(RunArgs),

    /// Show the execution order of the pipeline's steps
    Graph(GraphArgs),
}

/// Arguments for the `run` command.
#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    /// Pipeline configuration file
    #[arg(short, long, env = "TAGFLOW_CONFIG")]
    pub config: PathBuf,

    /// Image store state file (created when missing)
    #[arg(short, long, env = "TAGFLOW_STATE")]
    pub state: PathBuf,

    /// Namespace to write to (overrides the config file)
    #[arg(short, long, env = "TAGFLOW_NAMESPACE")]
    pub namespace: Option<String>,

    /// Run identifier (overrides the config file)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Render what would be written without writing
    #[arg(long)]
    pub dry_run: bool,

    /// Re-run specified steps even if done (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub force: Vec<String>,

    /// Print a published parameter after the run (repeatable)
    #[arg(short, long = "param")]
    pub params: Vec<String>,

    /// Maximum number of steps executing at once (overrides the config file)
    #[arg(long)]
    pub max_parallel: Option<usize>,
}

/// Arguments for the `graph` command.
#[derive(Debug, Clone, clap::Args)]
pub struct GraphArgs {
    /// Pipeline configuration file
    #[arg(short, long, env = "TAGFLOW_CONFIG")]
    pub config: PathBuf,

    /// Namespace shown in step descriptions
    #[arg(short, long, env = "TAGFLOW_NAMESPACE")]
    pub namespace: Option<String>,
}
