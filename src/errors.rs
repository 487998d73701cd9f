use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse JSON configuration in {path}: {source}")]
    JsonParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },
}

/// File-level parser failures. Row-level problems never surface here; the
/// parsers log and skip bad rows so one malformed line cannot abort a file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading data file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Error reading CSV headers in {path}: {source}")]
    HeaderReadError {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("File {path} is missing mandatory headers: {missing:?}")]
    MissingHeaders { path: PathBuf, missing: Vec<String> },
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to install filesystem watch: {0}")]
    Watch(#[from] notify::Error),
    #[error("No paths given to watch")]
    EmptyWatchSet,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration parsing failed: {0}")]
    Config(#[from] ConfigError),
    #[error("Parsing failed for {1}: {0}")]
    Parse(ParseError, PathBuf),
    #[error("Scanner failure: {0}")]
    Scan(#[from] ScanError),
    #[error("Cannot merge datasets from different projects: {expected} vs {found}")]
    ProjectMismatch { expected: String, found: String },
    #[error("No input datasets to process")]
    EmptyInput,
}
