use super::{
    bank_id_from_path, decode_bytes, extract_cells, group_id_from_path, parse_numeric,
    parse_project_two_timestamp, read_headers, sorted_cell_columns, CELL_SOC_RE, CELL_SOH_RE,
    CELL_TEMP_RE, CELL_VOLTAGE_RE,
};
use crate::config::PipelineConfig;
use crate::errors::ParseError;
use crate::models::{DataTypeId, ProjectType, TimeRange};
use crate::raw::{RawData, RawMetadata, RawRow};
use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use log::{debug, warn};
use regex::Regex;
use std::fs;
use std::path::Path;

/// The cell-column pattern a data type's files use.
fn cell_pattern(data_type: DataTypeId) -> &'static Regex {
    match data_type {
        DataTypeId::Voltage => &CELL_VOLTAGE_RE,
        DataTypeId::Temperature => &CELL_TEMP_RE,
        DataTypeId::Soc => &CELL_SOC_RE,
        DataTypeId::State => &CELL_SOH_RE,
    }
}

/// Parses one Project2 export. The `data_type` discriminator selects which
/// scalar and cell layout to expect; everything else follows the Project1
/// contract: I/O and missing-header errors propagate, bad rows are skipped.
pub fn parse_file(
    path: &Path,
    data_type: DataTypeId,
    config: &PipelineConfig,
) -> Result<RawData, ParseError> {
    let bytes = fs::read(path).map_err(|e| ParseError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let text = decode_bytes(&bytes, &config.project_two_encoding);

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::HeaderReadError {
            path: path.to_path_buf(),
            source: e,
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let index_of = |name: &str| headers.iter().position(|h| h == name);
    let ts_idx = index_of("时间");
    if ts_idx.is_none() {
        return Err(ParseError::MissingHeaders {
            path: path.to_path_buf(),
            missing: vec!["时间".to_string()],
        });
    }

    // Aggregates present per data type: voltage files carry pack voltage and
    // current, soc files carry pack SOC, state files carry pack SOH.
    let voltage_idx = index_of("总电压");
    let current_idx = index_of("总电流");
    let soc_idx = index_of("SOC");
    let soh_idx = index_of("SOH");

    let cell_cols = sorted_cell_columns(&headers, cell_pattern(data_type));
    let cell_count = config.cell_count;

    let mut rows = Vec::new();
    let mut min_ts: Option<DateTime<Utc>> = None;
    let mut max_ts: Option<DateTime<Utc>> = None;

    for (row_index, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    "Skipping unreadable row {} in {}: {}",
                    row_index + 1,
                    path.display(),
                    e
                );
                continue;
            }
        };

        let scalar = |idx: Option<usize>| idx.and_then(|i| parse_numeric(record.get(i)));
        let timestamp = ts_idx
            .and_then(|i| record.get(i))
            .unwrap_or("")
            .trim()
            .to_string();

        if let Some(ts) = parse_project_two_timestamp(&timestamp) {
            min_ts = Some(min_ts.map_or(ts, |m| m.min(ts)));
            max_ts = Some(max_ts.map_or(ts, |m| m.max(ts)));
        }

        let mut row = RawRow::empty(timestamp, cell_count);
        let cells = extract_cells(&record, &cell_cols, cell_count);
        match data_type {
            DataTypeId::Voltage => {
                row.voltage = scalar(voltage_idx);
                row.current = scalar(current_idx);
                row.cell_voltages = cells;
            }
            DataTypeId::Temperature => {
                row.cell_temperatures = cells;
            }
            DataTypeId::Soc => {
                row.soc = scalar(soc_idx);
                row.cell_socs = cells;
            }
            DataTypeId::State => {
                row.soh = scalar(soh_idx);
                row.cell_sohs = cells;
            }
        }
        rows.push(row);
    }

    let time_range = match (min_ts, max_ts) {
        (Some(start), Some(end)) => TimeRange { start, end },
        _ => TimeRange::empty_now(),
    };

    debug!(
        "Parsed {} {} rows from {}",
        rows.len(),
        data_type.as_str(),
        path.display()
    );

    let row_count = rows.len();
    Ok(RawData {
        headers,
        rows,
        metadata: RawMetadata {
            source_file: path.to_path_buf(),
            project: ProjectType::Project2,
            system_id: None,
            group_id: group_id_from_path(path),
            data_type: Some(data_type),
            bank_id: bank_id_from_path(path),
            time_range,
            row_count,
        },
    })
}

/// Header-only precheck for a Project2 file of the given data type: the
/// timestamp column plus at least one cell column of the type's prefix.
pub fn validate_csv_format(path: &Path, data_type: DataTypeId, config: &PipelineConfig) -> bool {
    let headers = match read_headers(path, &config.project_two_encoding) {
        Ok(h) => h,
        Err(e) => {
            warn!("Cannot validate {}: {}", path.display(), e);
            return false;
        }
    };

    if !headers.iter().any(|h| h == "时间") {
        warn!("{} is missing the timestamp header", path.display());
        return false;
    }

    let pattern = cell_pattern(data_type);
    if !headers.iter().any(|h| pattern.is_match(h)) {
        warn!(
            "{} has no per-cell {} columns",
            path.display(),
            data_type.as_str()
        );
        return false;
    }

    true
}
