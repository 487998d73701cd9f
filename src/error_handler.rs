use crate::models::{
    ConversionError, ConversionErrorType, ConversionWarning, ErrorCategory,
    ErrorHandlingStrategy, ErrorSeverity, FileNotFoundAction, RowErrorAction, StrategyUpdate,
    ValidationAction, WarningType,
};
use chrono::Utc;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Site of the failure, threaded through every handling call.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub row_index: Option<usize>,
    pub field: Option<String>,
    pub operation: Option<String>,
    pub retry_count: u32,
}

/// Cumulative counters, accumulated across the life of one handler instance.
#[derive(Debug, Clone, Default)]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub errors_by_category: HashMap<ErrorCategory, u64>,
    pub errors_by_severity: HashMap<ErrorSeverity, u64>,
}

/// What the caller should do next, plus the report records produced.
#[derive(Debug, Clone)]
pub struct HandlingDecision {
    pub should_continue: bool,
    pub should_retry: bool,
    pub retry_delay: Option<Duration>,
    pub error: Option<ConversionError>,
    pub warning: Option<ConversionWarning>,
}

/// Classification and policy for conversion failures. Classification is pure;
/// the strategy, the statistics counters and the per-file error tallies are
/// the only mutable state, each behind its own mutex so one handler can be
/// shared across file workers.
pub struct ErrorHandler {
    strategy: Mutex<ErrorHandlingStrategy>,
    statistics: Mutex<ErrorStatistics>,
    file_errors: Mutex<HashMap<PathBuf, usize>>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        ErrorHandler::new(ErrorHandlingStrategy::default())
    }
}

impl ErrorHandler {
    pub fn new(strategy: ErrorHandlingStrategy) -> ErrorHandler {
        ErrorHandler {
            strategy: Mutex::new(strategy),
            statistics: Mutex::new(ErrorStatistics::default()),
            file_errors: Mutex::new(HashMap::new()),
        }
    }

    /// Current strategy snapshot.
    pub fn strategy(&self) -> ErrorHandlingStrategy {
        self.strategy.lock().clone()
    }

    /// Atomically merges the update into the active strategy. Readers see
    /// either the old strategy or the fully merged one, never a mix.
    pub fn set_strategy(&self, update: &StrategyUpdate) {
        let mut guard = self.strategy.lock();
        let merged = guard.merged_with(update);
        *guard = merged;
    }

    /// Keyword classification over the error message, checked in a fixed
    /// priority order; first match wins. When the message decides nothing the
    /// context's operation name is used as a fallback hint.
    pub fn categorize_error(message: &str, context: &ErrorContext) -> ErrorCategory {
        let lower = message.to_lowercase();

        if contains_any(&lower, &["no such file", "not found", "permission denied", "access denied", "enoent", "eacces"]) {
            return ErrorCategory::FileAccess;
        }
        if contains_any(&lower, &["header", "format", "delimiter", "encoding", "malformed"]) {
            return ErrorCategory::FileFormat;
        }
        if contains_any(&lower, &["parse", "invalid digit", "invalid float", "timestamp", "unexpected token"]) {
            return ErrorCategory::DataParsing;
        }
        if contains_any(&lower, &["validation", "out of range", "invalid value", "constraint"]) {
            return ErrorCategory::DataValidation;
        }
        if contains_any(&lower, &["transform", "merge", "aggregate"]) {
            return ErrorCategory::DataTransform;
        }
        if contains_any(&lower, &["memory", "allocation", "oom"]) {
            return ErrorCategory::MemoryError;
        }
        if contains_any(&lower, &["network", "connection", "timed out", "timeout"]) {
            return ErrorCategory::NetworkError;
        }

        if let Some(op) = &context.operation {
            let op = op.to_lowercase();
            if op.contains("parse") {
                return ErrorCategory::DataParsing;
            }
            if op.contains("valid") {
                return ErrorCategory::DataValidation;
            }
            if op.contains("transform") {
                return ErrorCategory::DataTransform;
            }
        }

        ErrorCategory::SystemError
    }

    /// Severity is a function of the category, with file-access splitting on
    /// permission-denied vs not-found.
    pub fn determine_severity(message: &str, category: ErrorCategory) -> ErrorSeverity {
        match category {
            ErrorCategory::MemoryError | ErrorCategory::SystemError => ErrorSeverity::Critical,
            ErrorCategory::FileAccess => {
                let lower = message.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    ErrorSeverity::High
                } else {
                    ErrorSeverity::Low
                }
            }
            ErrorCategory::DataTransform | ErrorCategory::NetworkError => ErrorSeverity::High,
            ErrorCategory::FileFormat | ErrorCategory::DataParsing => ErrorSeverity::Medium,
            ErrorCategory::DataValidation => ErrorSeverity::Low,
        }
    }

    pub fn should_retry(&self, category: ErrorCategory, retry_count: u32) -> bool {
        let max_retries = self.strategy.lock().max_retries;
        if retry_count >= max_retries {
            return false;
        }
        matches!(
            category,
            ErrorCategory::NetworkError | ErrorCategory::SystemError | ErrorCategory::FileAccess
        )
    }

    /// Policy decision for a file-level failure. Not-found is special-cased by
    /// `on_file_not_found`; every other file error follows `continue_on_error`
    /// plus the retryability of its category.
    pub fn handle_file_error(&self, message: &str, context: &ErrorContext) -> HandlingDecision {
        let category = Self::categorize_error(message, context);
        let severity = Self::determine_severity(message, category);
        let strategy = self.strategy();

        let lower = message.to_lowercase();
        let not_found = category == ErrorCategory::FileAccess
            && contains_any(&lower, &["not found", "no such file", "enoent"]);

        let decision = if not_found {
            match strategy.on_file_not_found {
                FileNotFoundAction::Skip => {
                    self.record(category, severity);
                    HandlingDecision {
                        should_continue: true,
                        should_retry: false,
                        retry_delay: None,
                        error: None,
                        warning: Some(self.create_warning(
                            "file",
                            &format!("Skipping missing file: {}", message),
                            context,
                        )),
                    }
                }
                FileNotFoundAction::Warn => {
                    self.record(category, severity);
                    HandlingDecision {
                        should_continue: true,
                        should_retry: false,
                        retry_delay: None,
                        error: None,
                        warning: Some(self.create_warning(
                            "file",
                            &format!("File not found, continuing without it: {}", message),
                            context,
                        )),
                    }
                }
                FileNotFoundAction::Error => {
                    let severity = ErrorSeverity::High;
                    self.record(category, severity);
                    HandlingDecision {
                        should_continue: false,
                        should_retry: false,
                        retry_delay: None,
                        error: Some(self.create_error(category, severity, message, context)),
                        warning: None,
                    }
                }
            }
        } else {
            let retry = self.should_retry(category, context.retry_count);
            self.record(category, severity);
            HandlingDecision {
                should_continue: strategy.continue_on_error,
                should_retry: retry,
                retry_delay: retry.then_some(strategy.retry_delay),
                error: Some(self.create_error(category, severity, message, context)),
                warning: None,
            }
        };

        debug!(
            "file error handled: continue={} retry={} ({})",
            decision.should_continue, decision.should_retry, message
        );
        decision
    }

    /// Policy decision for one bad row. Rows are never retryable; `Abort`
    /// stops the file and escalates to critical regardless of the computed
    /// severity. A file whose accumulated row and validation errors pass
    /// `max_errors_per_file` stops regardless of the per-row action.
    pub fn handle_row_error(&self, message: &str, context: &ErrorContext) -> HandlingDecision {
        let category = Self::categorize_error(message, context);
        let severity = Self::determine_severity(message, category);
        let strategy = self.strategy();

        let decision = match strategy.on_parse_error {
            RowErrorAction::Skip => {
                self.record(category, severity);
                HandlingDecision {
                    should_continue: true,
                    should_retry: false,
                    retry_delay: None,
                    error: None,
                    warning: Some(self.create_warning(
                        "parse",
                        &format!("Row skipped: {}", message),
                        context,
                    )),
                }
            }
            RowErrorAction::UseDefault => {
                self.record(category, severity);
                HandlingDecision {
                    should_continue: true,
                    should_retry: false,
                    retry_delay: None,
                    error: None,
                    warning: Some(self.create_warning(
                        "parse",
                        &format!("Default value substituted: {}", message),
                        context,
                    )),
                }
            }
            RowErrorAction::Abort => {
                let severity = ErrorSeverity::Critical;
                self.record(category, severity);
                HandlingDecision {
                    should_continue: false,
                    should_retry: false,
                    retry_delay: None,
                    error: Some(self.create_error(category, severity, message, context)),
                    warning: None,
                }
            }
        };

        self.enforce_file_limit(decision, strategy.max_errors_per_file, category, message, context)
    }

    /// Policy decision for a validation failure; `Abort` stops and escalates
    /// to high. Counts against the same per-file error budget as row errors.
    pub fn handle_validation_error(&self, message: &str, context: &ErrorContext) -> HandlingDecision {
        let category = Self::categorize_error(message, context);
        let severity = Self::determine_severity(message, category);
        let strategy = self.strategy();

        let decision = match strategy.on_validation_error {
            ValidationAction::Skip => {
                self.record(category, severity);
                HandlingDecision {
                    should_continue: true,
                    should_retry: false,
                    retry_delay: None,
                    error: None,
                    warning: Some(self.create_warning(
                        "validate",
                        &format!("Validation failure skipped: {}", message),
                        context,
                    )),
                }
            }
            ValidationAction::Correct => {
                self.record(category, severity);
                HandlingDecision {
                    should_continue: true,
                    should_retry: false,
                    retry_delay: None,
                    error: None,
                    warning: Some(self.create_warning(
                        "validate",
                        &format!("Value corrected to nearest valid: {}", message),
                        context,
                    )),
                }
            }
            ValidationAction::Abort => {
                let severity = ErrorSeverity::High;
                self.record(category, severity);
                HandlingDecision {
                    should_continue: false,
                    should_retry: false,
                    retry_delay: None,
                    error: Some(self.create_error(category, severity, message, context)),
                    warning: None,
                }
            }
        };

        self.enforce_file_limit(decision, strategy.max_errors_per_file, category, message, context)
    }

    /// Tallies one more error against the context's file and flips the
    /// decision to stop once the tally passes `limit`. Contexts without a
    /// file path are not budgeted.
    fn enforce_file_limit(
        &self,
        mut decision: HandlingDecision,
        limit: usize,
        category: ErrorCategory,
        message: &str,
        context: &ErrorContext,
    ) -> HandlingDecision {
        let Some(path) = context.file_path.as_ref() else {
            return decision;
        };

        let count = {
            let mut counts = self.file_errors.lock();
            let count = counts.entry(path.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if decision.should_continue && count > limit {
            warn!(
                "Error limit of {} exceeded for {} ({} errors), stopping the file",
                limit,
                path.display(),
                count
            );
            decision.should_continue = false;
            decision.error = Some(self.create_error(
                category,
                ErrorSeverity::High,
                &format!("Per-file error limit of {} exceeded: {}", limit, message),
                context,
            ));
        }

        decision
    }

    pub fn create_error(
        &self,
        category: ErrorCategory,
        severity: ErrorSeverity,
        message: &str,
        context: &ErrorContext,
    ) -> ConversionError {
        ConversionError {
            id: Uuid::new_v4(),
            error_type: error_type_for(category),
            severity,
            file_path: context.file_path.clone(),
            row_index: context.row_index,
            field: context.field.clone(),
            message: message.to_string(),
            details: context
                .operation
                .as_ref()
                .map(|op| serde_json::json!({ "operation": op })),
            timestamp: Utc::now(),
        }
    }

    pub fn create_warning(
        &self,
        operation: &str,
        message: &str,
        context: &ErrorContext,
    ) -> ConversionWarning {
        ConversionWarning {
            id: Uuid::new_v4(),
            warning_type: warning_type_for(operation),
            file_path: context.file_path.clone(),
            row_index: context.row_index,
            message: message.to_string(),
            suggestion: suggestion_for(message),
            timestamp: Utc::now(),
        }
    }

    pub fn statistics(&self) -> ErrorStatistics {
        self.statistics.lock().clone()
    }

    pub fn reset_statistics(&self) {
        *self.statistics.lock() = ErrorStatistics::default();
        self.file_errors.lock().clear();
    }

    fn record(&self, category: ErrorCategory, severity: ErrorSeverity) {
        let mut stats = self.statistics.lock();
        stats.total_errors += 1;
        *stats.errors_by_category.entry(category).or_insert(0) += 1;
        *stats.errors_by_severity.entry(severity).or_insert(0) += 1;
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Fixed category -> error-type table.
fn error_type_for(category: ErrorCategory) -> ConversionErrorType {
    match category {
        ErrorCategory::FileAccess => ConversionErrorType::FileError,
        ErrorCategory::FileFormat => ConversionErrorType::FormatError,
        ErrorCategory::DataParsing => ConversionErrorType::ParseError,
        ErrorCategory::DataValidation => ConversionErrorType::ValidationError,
        ErrorCategory::DataTransform => ConversionErrorType::TransformError,
        ErrorCategory::MemoryError => ConversionErrorType::ResourceError,
        ErrorCategory::NetworkError => ConversionErrorType::NetworkError,
        ErrorCategory::SystemError => ConversionErrorType::SystemError,
    }
}

/// Fixed operation-keyword -> warning-type table.
fn warning_type_for(operation: &str) -> WarningType {
    let op = operation.to_lowercase();
    if op.contains("parse") {
        WarningType::ParseWarning
    } else if op.contains("valid") {
        WarningType::ValidationWarning
    } else if op.contains("transform") || op.contains("merge") {
        WarningType::TransformWarning
    } else if op.contains("file") || op.contains("scan") {
        WarningType::FileWarning
    } else {
        WarningType::GeneralWarning
    }
}

/// Remediation hint chosen by substring match on the message.
fn suggestion_for(message: &str) -> String {
    let lower = message.to_lowercase();
    let text = if lower.contains("not found") || lower.contains("no such file") {
        "Check that the export directory layout matches the site convention"
    } else if lower.contains("permission") || lower.contains("denied") {
        "Check read permissions on the export directory"
    } else if lower.contains("timestamp") {
        "Verify the timestamp column uses the expected format for this project"
    } else if lower.contains("header") {
        "Re-export the file with the full mandatory column set"
    } else if lower.contains("encoding") {
        "Confirm the configured text encoding matches the export"
    } else if lower.contains("out of range") {
        "Inspect the sensor readings around the reported row"
    } else {
        "Review the source file for irregularities near the reported location"
    };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ErrorContext {
        ErrorContext::default()
    }

    #[test]
    fn categorization_is_deterministic_and_ordered() {
        // "permission denied while parsing" must hit file_access first.
        let c = ErrorHandler::categorize_error("permission denied while parsing", &ctx());
        assert_eq!(c, ErrorCategory::FileAccess);

        assert_eq!(
            ErrorHandler::categorize_error("unexpected header count", &ctx()),
            ErrorCategory::FileFormat
        );
        assert_eq!(
            ErrorHandler::categorize_error("failed to parse value", &ctx()),
            ErrorCategory::DataParsing
        );
        assert_eq!(
            ErrorHandler::categorize_error("value out of range", &ctx()),
            ErrorCategory::DataValidation
        );
        assert_eq!(
            ErrorHandler::categorize_error("transform stage failed", &ctx()),
            ErrorCategory::DataTransform
        );
        assert_eq!(
            ErrorHandler::categorize_error("allocation failed", &ctx()),
            ErrorCategory::MemoryError
        );
        assert_eq!(
            ErrorHandler::categorize_error("connection refused", &ctx()),
            ErrorCategory::NetworkError
        );
        assert_eq!(
            ErrorHandler::categorize_error("something odd happened", &ctx()),
            ErrorCategory::SystemError
        );

        // Same inputs, same outputs.
        for _ in 0..3 {
            assert_eq!(
                ErrorHandler::categorize_error("failed to parse value", &ctx()),
                ErrorCategory::DataParsing
            );
        }
    }

    #[test]
    fn operation_hint_breaks_ties() {
        let context = ErrorContext {
            operation: Some("transform_project_one".to_string()),
            ..Default::default()
        };
        assert_eq!(
            ErrorHandler::categorize_error("unexpected condition", &context),
            ErrorCategory::DataTransform
        );
    }

    #[test]
    fn severity_follows_category() {
        assert_eq!(
            ErrorHandler::determine_severity("oom", ErrorCategory::MemoryError),
            ErrorSeverity::Critical
        );
        assert_eq!(
            ErrorHandler::determine_severity("permission denied", ErrorCategory::FileAccess),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorHandler::determine_severity("file not found", ErrorCategory::FileAccess),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorHandler::determine_severity("bad parse", ErrorCategory::DataParsing),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorHandler::determine_severity("bad value", ErrorCategory::DataValidation),
            ErrorSeverity::Low
        );
    }

    #[test]
    fn file_not_found_follows_strategy() {
        let handler = ErrorHandler::default();

        handler.set_strategy(&StrategyUpdate {
            on_file_not_found: Some(FileNotFoundAction::Skip),
            ..Default::default()
        });
        let d = handler.handle_file_error("data file not found: bank1.csv", &ctx());
        assert!(d.should_continue);
        assert!(d.warning.is_some());
        assert!(d.error.is_none());

        handler.set_strategy(&StrategyUpdate {
            on_file_not_found: Some(FileNotFoundAction::Error),
            ..Default::default()
        });
        let d = handler.handle_file_error("data file not found: bank1.csv", &ctx());
        assert!(!d.should_continue);
        let err = d.error.unwrap();
        assert_eq!(err.severity, ErrorSeverity::High);
        assert_eq!(err.error_type, ConversionErrorType::FileError);
    }

    #[test]
    fn abort_escalates_row_errors_to_critical() {
        let handler = ErrorHandler::default();
        handler.set_strategy(&StrategyUpdate {
            on_parse_error: Some(RowErrorAction::Abort),
            ..Default::default()
        });
        let d = handler.handle_row_error("failed to parse cell voltage", &ctx());
        assert!(!d.should_continue);
        assert_eq!(d.error.unwrap().severity, ErrorSeverity::Critical);
    }

    #[test]
    fn abort_escalates_validation_errors_to_high() {
        let handler = ErrorHandler::default();
        handler.set_strategy(&StrategyUpdate {
            on_validation_error: Some(ValidationAction::Abort),
            ..Default::default()
        });
        let d = handler.handle_validation_error("validation failed: soc out of range", &ctx());
        assert!(!d.should_continue);
        assert_eq!(d.error.unwrap().severity, ErrorSeverity::High);
    }

    #[test]
    fn retry_only_for_transient_categories_until_exhausted() {
        let handler = ErrorHandler::default();
        handler.set_strategy(&StrategyUpdate {
            max_retries: Some(2),
            ..Default::default()
        });

        assert!(handler.should_retry(ErrorCategory::NetworkError, 0));
        assert!(handler.should_retry(ErrorCategory::SystemError, 1));
        assert!(handler.should_retry(ErrorCategory::FileAccess, 1));
        assert!(!handler.should_retry(ErrorCategory::NetworkError, 2));
        assert!(!handler.should_retry(ErrorCategory::NetworkError, 3));
        assert!(!handler.should_retry(ErrorCategory::DataParsing, 0));
        assert!(!handler.should_retry(ErrorCategory::DataValidation, 0));
    }

    #[test]
    fn per_file_error_limit_stops_the_file() {
        let handler = ErrorHandler::new(ErrorHandlingStrategy {
            max_errors_per_file: 2,
            ..ErrorHandlingStrategy::default()
        });
        let file_a = ErrorContext {
            file_path: Some(PathBuf::from("/exports/1#/Bank01.csv")),
            ..ErrorContext::default()
        };

        // Within budget: the Skip action keeps the file going.
        assert!(handler.handle_row_error("parse failed", &file_a).should_continue);
        assert!(handler.handle_row_error("parse failed", &file_a).should_continue);

        // Third error passes the limit and flips the decision.
        let third = handler.handle_row_error("parse failed", &file_a);
        assert!(!third.should_continue);
        let error = third.error.unwrap();
        assert_eq!(error.severity, ErrorSeverity::High);
        assert!(error.message.contains("limit"));

        // Other files keep their own budget.
        let file_b = ErrorContext {
            file_path: Some(PathBuf::from("/exports/1#/Bank02.csv")),
            ..ErrorContext::default()
        };
        assert!(handler.handle_row_error("parse failed", &file_b).should_continue);

        // Validation errors draw from the same budget as row errors.
        assert!(handler.handle_validation_error("out of range", &file_b).should_continue);
        assert!(!handler.handle_row_error("parse failed", &file_b).should_continue);

        // reset_statistics clears the tallies.
        handler.reset_statistics();
        assert!(handler.handle_row_error("parse failed", &file_a).should_continue);
    }

    #[test]
    fn statistics_tally_by_category_and_severity_and_reset() {
        let handler = ErrorHandler::default();
        handler.handle_row_error("failed to parse value", &ctx());
        handler.handle_file_error("permission denied: bank2.csv", &ctx());
        handler.handle_validation_error("validation failed", &ctx());

        let stats = handler.statistics();
        assert_eq!(stats.total_errors, 3);
        assert_eq!(stats.errors_by_category[&ErrorCategory::DataParsing], 1);
        assert_eq!(stats.errors_by_category[&ErrorCategory::FileAccess], 1);
        assert_eq!(stats.errors_by_category[&ErrorCategory::DataValidation], 1);
        assert_eq!(stats.errors_by_severity[&ErrorSeverity::Medium], 1);
        assert_eq!(stats.errors_by_severity[&ErrorSeverity::High], 1);
        assert_eq!(stats.errors_by_severity[&ErrorSeverity::Low], 1);

        handler.reset_statistics();
        let stats = handler.statistics();
        assert_eq!(stats.total_errors, 0);
        assert!(stats.errors_by_category.is_empty());
        assert!(stats.errors_by_severity.is_empty());
    }

    #[test]
    fn created_records_carry_unique_ids_and_context() {
        let handler = ErrorHandler::default();
        let context = ErrorContext {
            file_path: Some(PathBuf::from("/data/1#/Bank01.csv")),
            row_index: Some(12),
            field: Some("voltage".to_string()),
            ..Default::default()
        };
        let a = handler.create_error(
            ErrorCategory::DataParsing,
            ErrorSeverity::Medium,
            "failed to parse voltage",
            &context,
        );
        let b = handler.create_error(
            ErrorCategory::DataParsing,
            ErrorSeverity::Medium,
            "failed to parse voltage",
            &context,
        );
        assert_ne!(a.id, b.id);
        assert_eq!(a.row_index, Some(12));
        assert_eq!(a.field.as_deref(), Some("voltage"));

        let w = handler.create_warning("parse", "Row skipped: timestamp unreadable", &context);
        assert_eq!(w.warning_type, WarningType::ParseWarning);
        assert!(w.suggestion.to_lowercase().contains("timestamp"));
    }
}
