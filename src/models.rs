use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

// --- Project identifiers ---
//
// The site layouts use a small fixed vocabulary of systems, groups and data
// types. Modeling them as closed enums means an identifier outside the set
// simply fails the boundary conversion and the file is treated as absent.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Project1,
    Project2,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Project1 => "project1",
            ProjectType::Project2 => "project2",
        }
    }
}

/// Project1 system identifier, appearing as a `<digits>#` path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SystemId {
    System1,
    System2,
    System3,
}

impl SystemId {
    pub const ALL: [SystemId; 3] = [SystemId::System1, SystemId::System2, SystemId::System3];

    /// The on-disk directory name, e.g. `1#`.
    pub fn dir_name(&self) -> &'static str {
        match self {
            SystemId::System1 => "1#",
            SystemId::System2 => "2#",
            SystemId::System3 => "3#",
        }
    }

    pub fn from_segment(segment: &str) -> Option<SystemId> {
        Self::ALL.iter().copied().find(|s| s.dir_name() == segment)
    }
}

/// Project2 group identifier, the top-level partition analogous to Project1's
/// system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GroupId {
    Group1,
    Group2,
    Group3,
    Group4,
}

impl GroupId {
    pub const ALL: [GroupId; 4] = [
        GroupId::Group1,
        GroupId::Group2,
        GroupId::Group3,
        GroupId::Group4,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            GroupId::Group1 => "group1",
            GroupId::Group2 => "group2",
            GroupId::Group3 => "group3",
            GroupId::Group4 => "group4",
        }
    }

    pub fn from_segment(segment: &str) -> Option<GroupId> {
        Self::ALL.iter().copied().find(|g| g.dir_name() == segment)
    }
}

/// Project2 data-type axis: which physical quantity a file encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataTypeId {
    Soc,
    State,
    Temperature,
    Voltage,
}

impl DataTypeId {
    pub const ALL: [DataTypeId; 4] = [
        DataTypeId::Soc,
        DataTypeId::State,
        DataTypeId::Temperature,
        DataTypeId::Voltage,
    ];

    /// Directory name and filename prefix for this data type.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataTypeId::Soc => "soc",
            DataTypeId::State => "state",
            DataTypeId::Temperature => "temperature",
            DataTypeId::Voltage => "voltage",
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<DataTypeId> {
        Self::ALL.iter().copied().find(|d| d.as_str() == tag)
    }
}

// --- Scanned file structures ---

/// Stat metadata for one discovered data file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub file_path: PathBuf,
    pub last_modified: DateTime<Utc>,
    pub file_size: u64,
}

/// System -> zero-padded bank id ("01", "02", ...) -> file entry.
pub type ProjectOneStructure = BTreeMap<SystemId, BTreeMap<String, FileEntry>>;

/// Group -> data type -> "YYYY-MM-DD" date key -> file entry.
pub type ProjectTwoStructure = BTreeMap<GroupId, BTreeMap<DataTypeId, BTreeMap<String, FileEntry>>>;

// --- Standardized time-series model ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Both bounds collapse to "now" when no rows parsed successfully.
    pub fn empty_now() -> TimeRange {
        let now = Utc::now();
        TimeRange { start: now, end: now }
    }
}

/// Aggregate readings for one bank at one timestamp. All fields are
/// null-coerced to 0 upstream so downstream statistics never see gaps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BankReadings {
    pub voltage: f64,
    pub current: f64,
    pub soc: f64,
    pub soh: f64,
    pub power: f64,
    pub temperature: f64,
}

/// Per-cell readings, index-aligned: slot `i` is always cell `i + 1`. A `None`
/// slot means the source file had no reading for that cell, which is distinct
/// from a reading of zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellReadings {
    pub voltages: Vec<Option<f64>>,
    pub temperatures: Vec<Option<f64>>,
    pub socs: Vec<Option<f64>>,
    pub sohs: Vec<Option<f64>>,
}

impl CellReadings {
    pub fn empty(cell_count: usize) -> CellReadings {
        CellReadings {
            voltages: vec![None; cell_count],
            temperatures: vec![None; cell_count],
            socs: vec![None; cell_count],
            sohs: vec![None; cell_count],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub bank: BankReadings,
    pub cells: CellReadings,
}

/// Simple arithmetic summary over one scalar series.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ValueStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BankStatistics {
    pub voltage: ValueStats,
    pub current: ValueStats,
    pub soc: ValueStats,
    pub soh: ValueStats,
    pub temperature: ValueStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankTimeSeries {
    pub bank_id: String,
    pub data_points: Vec<TimeSeriesPoint>,
    pub statistics: BankStatistics,
}

/// Record counts plus three [0, 1] data-quality scores.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ProjectSummary {
    pub total_records: usize,
    pub valid_records: usize,
    pub error_records: usize,
    pub completeness: f64,
    pub accuracy: f64,
    pub consistency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandardBatteryData {
    pub project_id: String,
    pub project_type: ProjectType,
    pub system_id: Option<SystemId>,
    pub group_id: Option<GroupId>,
    pub time_range: TimeRange,
    pub banks: Vec<BankTimeSeries>,
    pub summary: ProjectSummary,
}

// --- Error classification vocabulary ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    FileAccess,
    FileFormat,
    DataParsing,
    DataValidation,
    DataTransform,
    SystemError,
    NetworkError,
    MemoryError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionErrorType {
    FileError,
    FormatError,
    ParseError,
    ValidationError,
    TransformError,
    ResourceError,
    NetworkError,
    SystemError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningType {
    ParseWarning,
    ValidationWarning,
    TransformWarning,
    FileWarning,
    GeneralWarning,
}

/// Immutable error record; created by the error handler only.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionError {
    pub id: Uuid,
    pub error_type: ConversionErrorType,
    pub severity: ErrorSeverity,
    pub file_path: Option<PathBuf>,
    pub row_index: Option<usize>,
    pub field: Option<String>,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Immutable warning record with a remediation suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionWarning {
    pub id: Uuid,
    pub warning_type: WarningType,
    pub file_path: Option<PathBuf>,
    pub row_index: Option<usize>,
    pub message: String,
    pub suggestion: String,
    pub timestamp: DateTime<Utc>,
}

// --- Error-handling strategy ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileNotFoundAction {
    Skip,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorAction {
    Skip,
    UseDefault,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationAction {
    Skip,
    Correct,
    Abort,
}

/// Process-wide policy read by every handling call. Owned by one
/// `ErrorHandler` instance and replaceable at runtime; updates are applied as
/// one atomic merge-and-store so callers never observe a half-updated strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlingStrategy {
    pub on_file_not_found: FileNotFoundAction,
    pub on_parse_error: RowErrorAction,
    pub on_validation_error: ValidationAction,
    pub max_errors_per_file: usize,
    pub continue_on_error: bool,
    pub max_retries: u32,
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
}

impl Default for ErrorHandlingStrategy {
    fn default() -> Self {
        ErrorHandlingStrategy {
            on_file_not_found: FileNotFoundAction::Warn,
            on_parse_error: RowErrorAction::Skip,
            on_validation_error: ValidationAction::Skip,
            max_errors_per_file: 100,
            continue_on_error: true,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Partial strategy update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyUpdate {
    pub on_file_not_found: Option<FileNotFoundAction>,
    pub on_parse_error: Option<RowErrorAction>,
    pub on_validation_error: Option<ValidationAction>,
    pub max_errors_per_file: Option<usize>,
    pub continue_on_error: Option<bool>,
    pub max_retries: Option<u32>,
    #[serde(rename = "retry_delay_ms", default, with = "opt_duration_ms")]
    pub retry_delay: Option<Duration>,
}

impl ErrorHandlingStrategy {
    pub fn merged_with(&self, update: &StrategyUpdate) -> ErrorHandlingStrategy {
        ErrorHandlingStrategy {
            on_file_not_found: update.on_file_not_found.unwrap_or(self.on_file_not_found),
            on_parse_error: update.on_parse_error.unwrap_or(self.on_parse_error),
            on_validation_error: update.on_validation_error.unwrap_or(self.on_validation_error),
            max_errors_per_file: update.max_errors_per_file.unwrap_or(self.max_errors_per_file),
            continue_on_error: update.continue_on_error.unwrap_or(self.continue_on_error),
            max_retries: update.max_retries.unwrap_or(self.max_retries),
            retry_delay: update.retry_delay.unwrap_or(self.retry_delay),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_id_round_trips_through_dir_name() {
        for sys in SystemId::ALL {
            assert_eq!(SystemId::from_segment(sys.dir_name()), Some(sys));
        }
        assert_eq!(SystemId::from_segment("4#"), None);
        assert_eq!(SystemId::from_segment("1"), None);
    }

    #[test]
    fn data_type_tags_are_closed() {
        assert_eq!(DataTypeId::from_str_tag("voltage"), Some(DataTypeId::Voltage));
        assert_eq!(DataTypeId::from_str_tag("current"), None);
    }

    #[test]
    fn strategy_merge_keeps_unset_fields() {
        let base = ErrorHandlingStrategy::default();
        let update = StrategyUpdate {
            max_retries: Some(7),
            on_file_not_found: Some(FileNotFoundAction::Error),
            ..Default::default()
        };
        let merged = base.merged_with(&update);
        assert_eq!(merged.max_retries, 7);
        assert_eq!(merged.on_file_not_found, FileNotFoundAction::Error);
        assert_eq!(merged.on_parse_error, base.on_parse_error);
        assert_eq!(merged.retry_delay, base.retry_delay);
    }

    #[test]
    fn strategy_deserializes_from_json() {
        let strategy: ErrorHandlingStrategy = serde_json::from_str(
            r#"{
                "on_file_not_found": "skip",
                "on_parse_error": "use_default",
                "on_validation_error": "abort",
                "max_errors_per_file": 10,
                "continue_on_error": false,
                "max_retries": 2,
                "retry_delay_ms": 250
            }"#,
        )
        .unwrap();
        assert_eq!(strategy.on_parse_error, RowErrorAction::UseDefault);
        assert_eq!(strategy.retry_delay, Duration::from_millis(250));
    }
}
