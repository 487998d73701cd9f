use crate::errors::ConfigError;
use crate::models::ErrorHandlingStrategy;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Top-level pipeline configuration, loaded from a JSON file. Every field has
/// a default so an empty `{}` document is a valid configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    /// Fixed slot count for the per-cell arrays. Files with fewer columns are
    /// null-padded, files with more are truncated.
    #[serde(default = "default_cell_count")]
    pub cell_count: usize,
    /// Text encoding of Project1 exports (Chinese headers, typically GBK).
    #[serde(default = "default_project_one_encoding")]
    pub project_one_encoding: String,
    #[serde(default = "default_project_two_encoding")]
    pub project_two_encoding: String,
    /// Worker cap for batch processing; `None` means one worker per CPU.
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub strategy: ErrorHandlingStrategy,
}

fn default_cell_count() -> usize {
    240
}

fn default_project_one_encoding() -> String {
    "GBK".to_string()
}

fn default_project_two_encoding() -> String {
    "UTF-8".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            cell_count: default_cell_count(),
            project_one_encoding: default_project_one_encoding(),
            project_two_encoding: default_project_two_encoding(),
            max_workers: None,
            strategy: ErrorHandlingStrategy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<PipelineConfig, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let reader = BufReader::new(file);

        serde_json::from_reader(reader).map_err(|e| ConfigError::JsonParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
