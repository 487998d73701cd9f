use crate::config::PipelineConfig;
use crate::error_handler::{ErrorContext, ErrorHandler};
use crate::models::{ConversionError, ConversionWarning, DataTypeId};
use crate::parsers;
use crate::raw::RawData;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Which parser a queued file goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    ProjectOne,
    ProjectTwo { data_type: DataTypeId },
}

/// One file queued for parsing.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub path: PathBuf,
    pub kind: TaskKind,
}

/// Result of processing a single file. Failures carry the handler's records
/// so batch callers can report them without re-deriving anything.
#[derive(Debug)]
pub struct FileProcessResult {
    pub file_path: String,
    pub raw: Option<RawData>,
    pub error: Option<ConversionError>,
    pub warning: Option<ConversionWarning>,
    #[allow(dead_code)]
    pub processing_time_ms: u128,
}

/// Parallel file processor using Rayon
pub struct ParallelProcessor {
    num_workers: usize,
}

impl ParallelProcessor {
    pub fn new() -> Self {
        let num_workers = num_cpus::get();
        info!("Initializing ParallelProcessor with {} workers", num_workers);
        Self { num_workers }
    }

    pub fn with_workers(num_workers: usize) -> Self {
        info!(
            "Initializing ParallelProcessor with {} custom workers",
            num_workers
        );
        Self { num_workers }
    }

    /// Worker count from `config.max_workers`, one per CPU when unset.
    pub fn from_config(config: &PipelineConfig) -> Self {
        match config.max_workers {
            Some(n) => Self::with_workers(n),
            None => Self::new(),
        }
    }

    /// Parse the queued files on a pool of `num_workers` threads. Per-file
    /// failures are routed through the error handler; once a handling
    /// decision says stop, remaining tasks are skipped (in-flight ones still
    /// finish, matching the cooperative abort model).
    pub fn process_files(
        &self,
        tasks: Vec<FileTask>,
        config: &PipelineConfig,
        handler: &ErrorHandler,
    ) -> Vec<FileProcessResult> {
        let total_files = tasks.len();
        info!(
            "Starting parallel processing of {} files on {} workers",
            total_files, self.num_workers
        );

        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_workers)
            .build()
        {
            Ok(pool) => pool.install(|| run_batch(tasks, config, handler)),
            Err(e) => {
                warn!(
                    "Could not build a {}-worker pool ({}), using the global pool",
                    self.num_workers, e
                );
                run_batch(tasks, config, handler)
            }
        }
    }
}

impl Default for ParallelProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn run_batch(
    tasks: Vec<FileTask>,
    config: &PipelineConfig,
    handler: &ErrorHandler,
) -> Vec<FileProcessResult> {
    let total_files = tasks.len();
    let progress = Arc::new(ProgressBar::new(total_files as u64));
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let stopped = Arc::new(AtomicBool::new(false));

    let results: Vec<FileProcessResult> = tasks
        .into_par_iter()
        .filter_map(|task| {
            if stopped.load(Ordering::Acquire) {
                return None;
            }

            let start = Instant::now();
            let file_path = task.path.to_string_lossy().to_string();
            let progress_clone = Arc::clone(&progress);
            let stopped_clone = Arc::clone(&stopped);

            let parsed = match task.kind {
                TaskKind::ProjectOne => parsers::project_one::parse_file(&task.path, config),
                TaskKind::ProjectTwo { data_type } => {
                    parsers::project_two::parse_file(&task.path, data_type, config)
                }
            };

            let result = match parsed {
                Ok(raw) => {
                    let processing_time = start.elapsed().as_millis();
                    info!(
                        "Successfully parsed {} rows from {} in {}ms",
                        raw.rows.len(),
                        file_path,
                        processing_time
                    );
                    FileProcessResult {
                        file_path,
                        raw: Some(raw),
                        error: None,
                        warning: None,
                        processing_time_ms: processing_time,
                    }
                }
                Err(e) => {
                    let processing_time = start.elapsed().as_millis();
                    error!("Failed to parse {}: {}", file_path, e);
                    let context = ErrorContext {
                        file_path: Some(task.path.clone()),
                        operation: Some("parse_file".to_string()),
                        ..ErrorContext::default()
                    };
                    let decision = handler.handle_file_error(&e.to_string(), &context);
                    if !decision.should_continue {
                        warn!("Stopping batch after {}", file_path);
                        stopped_clone.store(true, Ordering::Release);
                    }
                    FileProcessResult {
                        file_path,
                        raw: None,
                        error: decision.error,
                        warning: decision.warning,
                        processing_time_ms: processing_time,
                    }
                }
            };

            progress_clone.inc(1);
            Some(result)
        })
        .collect();

    progress.finish_with_message("File processing completed");
    results
}

/// Expands glob patterns in the task list, leaving literal paths untouched.
pub fn expand_globs(tasks: &[FileTask]) -> Vec<FileTask> {
    tasks
        .par_iter()
        .flat_map(|task| {
            let path_str = task.path.to_string_lossy();
            if path_str.contains('*') || path_str.contains('?') {
                match glob::glob(&path_str) {
                    Ok(paths) => {
                        let expanded: Vec<FileTask> = paths
                            .filter_map(|entry| entry.ok())
                            .map(|path| FileTask {
                                path,
                                kind: task.kind,
                            })
                            .collect();
                        info!("Expanded glob {} to {} files", path_str, expanded.len());
                        expanded
                    }
                    Err(e) => {
                        error!("Invalid glob pattern {}: {}", path_str, e);
                        vec![task.clone()]
                    }
                }
            } else {
                vec![task.clone()]
            }
        })
        .collect()
}
