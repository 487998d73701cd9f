use crate::models::{DataTypeId, GroupId, ProjectType, SystemId, TimeRange};
use std::path::PathBuf;

/// One parsed source row. Scalar fields stay `None` when the source value was
/// missing or unparseable; the transformer decides how to coerce them. The
/// four cell arrays always hold exactly the configured cell count, so index
/// `i` denotes cell `i + 1` no matter how many columns the file had.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub timestamp: String,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub soc: Option<f64>,
    pub soh: Option<f64>,
    pub cell_voltages: Vec<Option<f64>>,
    pub cell_temperatures: Vec<Option<f64>>,
    pub cell_socs: Vec<Option<f64>>,
    pub cell_sohs: Vec<Option<f64>>,
}

impl RawRow {
    pub fn empty(timestamp: String, cell_count: usize) -> RawRow {
        RawRow {
            timestamp,
            voltage: None,
            current: None,
            soc: None,
            soh: None,
            cell_voltages: vec![None; cell_count],
            cell_temperatures: vec![None; cell_count],
            cell_socs: vec![None; cell_count],
            cell_sohs: vec![None; cell_count],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawMetadata {
    pub source_file: PathBuf,
    pub project: ProjectType,
    /// System the file belongs to, when a `<digits>#` path segment named one.
    pub system_id: Option<SystemId>,
    pub group_id: Option<GroupId>,
    pub data_type: Option<DataTypeId>,
    /// Zero-padded bank number from the filename, or "unknown".
    pub bank_id: String,
    pub time_range: TimeRange,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawData {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    pub metadata: RawMetadata,
}
