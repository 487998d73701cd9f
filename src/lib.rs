//! Ingestion pipeline for battery energy storage CSV exports.
//!
//! Two vendor conventions are supported: numbered-system exports with one
//! `Bank<k>` file per bank (project1, GBK encoded) and grouped per-data-type
//! exports with dated file names (project2, UTF-8). Scanning, parsing,
//! transformation into a standardized time-sorted model, and error handling
//! each live in their own module.

pub mod config;
pub mod error_handler;
pub mod errors;
pub mod models;
pub mod parallel;
pub mod parsers;
pub mod raw;
pub mod retry;
pub mod scanner;
pub mod transform;
pub mod watcher;

pub use config::PipelineConfig;
pub use error_handler::{ErrorContext, ErrorHandler, ErrorStatistics, HandlingDecision};
pub use errors::{ConfigError, ParseError, PipelineError, ScanError};
pub use models::{
    DataTypeId, ErrorCategory, ErrorHandlingStrategy, ErrorSeverity, GroupId, ProjectType,
    StandardBatteryData, StrategyUpdate, SystemId,
};
pub use parallel::{FileProcessResult, FileTask, ParallelProcessor, TaskKind};
pub use raw::{RawData, RawMetadata, RawRow};
pub use scanner::FileScanner;
pub use transform::DataTransformer;
pub use watcher::{PathWatcher, WatchEvent, WatchEventKind};
