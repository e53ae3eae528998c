//! Configuration file loading.

use crate::config::schema::PipelineConfig;
use crate::error::{Result, TagflowError};
use std::fs;
use std::path::Path;

/// Load a single config file and parse it into [`PipelineConfig`].
///
/// # Errors
///
/// Returns `ConfigNotFound` if the file doesn't exist.
/// Returns `ConfigParseError` if the YAML is invalid.
pub fn load_config_file(path: &Path) -> Result<PipelineConfig> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TagflowError::ConfigNotFound {
                path: path.to_path_buf(),
            }
        } else {
            TagflowError::Io(e)
        }
    })?;

    parse_config(&content, path)
}

/// Parse YAML content into [`PipelineConfig`].
///
/// # Arguments
///
/// * `content` - The YAML content to parse
/// * `source_path` - Path for error reporting
pub fn parse_config(content: &str, source_path: &Path) -> Result<PipelineConfig> {
    serde_yaml::from_str(content).map_err(|e| TagflowError::ConfigParseError {
        path: source_path.to_path_buf(),
        message: e.to_string(),
    })
}
