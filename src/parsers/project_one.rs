use super::{
    bank_id_from_path, decode_bytes, extract_cells, parse_numeric, parse_project_one_timestamp,
    read_headers, sorted_cell_columns, system_id_from_path, CELL_SOC_RE, CELL_SOH_RE,
    CELL_TEMP_RE, CELL_VOLTAGE_RE,
};
use crate::config::PipelineConfig;
use crate::errors::ParseError;
use crate::models::{ProjectType, TimeRange};
use crate::raw::{RawData, RawMetadata, RawRow};
use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use log::{debug, warn};
use std::fs;
use std::path::Path;

/// Mandatory Project1 aggregate headers.
const MANDATORY_HEADERS: [&str; 5] = ["时间", "总电压", "总电流", "SOC", "SOH"];

/// Parses one Project1 bank export. File-level failures (I/O, missing
/// mandatory headers) propagate; bad rows are logged and skipped so the rest
/// of the file survives.
pub fn parse_file(path: &Path, config: &PipelineConfig) -> Result<RawData, ParseError> {
    let bytes = fs::read(path).map_err(|e| ParseError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let text = decode_bytes(&bytes, &config.project_one_encoding);

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

    let missing: Vec<String> = MANDATORY_HEADERS
        .iter()
        .filter(|name| !headers.iter().any(|h| h == *name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::MissingHeaders {
            path: path.to_path_buf(),
            missing,
        });
    }

    let index_of = |name: &str| headers.iter().position(|h| h == name);
    let ts_idx = index_of("时间");
    let voltage_idx = index_of("总电压");
    let current_idx = index_of("总电流");
    let soc_idx = index_of("SOC");
    let soh_idx = index_of("SOH");

    let voltage_cols = sorted_cell_columns(&headers, &CELL_VOLTAGE_RE);
    let temp_cols = sorted_cell_columns(&headers, &CELL_TEMP_RE);
    let soc_cols = sorted_cell_columns(&headers, &CELL_SOC_RE);
    let soh_cols = sorted_cell_columns(&headers, &CELL_SOH_RE);

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

        if let Some(ts) = parse_project_one_timestamp(&timestamp) {
            min_ts = Some(min_ts.map_or(ts, |m| m.min(ts)));
            max_ts = Some(max_ts.map_or(ts, |m| m.max(ts)));
        }

        rows.push(RawRow {
            timestamp,
            voltage: scalar(voltage_idx),
            current: scalar(current_idx),
            soc: scalar(soc_idx),
            soh: scalar(soh_idx),
            cell_voltages: extract_cells(&record, &voltage_cols, cell_count),
            cell_temperatures: extract_cells(&record, &temp_cols, cell_count),
            cell_socs: extract_cells(&record, &soc_cols, cell_count),
            cell_sohs: extract_cells(&record, &soh_cols, cell_count),
        });
    }

    let time_range = match (min_ts, max_ts) {
        (Some(start), Some(end)) => TimeRange { start, end },
        _ => TimeRange::empty_now(),
    };

    debug!(
        "Parsed {} rows from {} ({} voltage cells in source)",
        rows.len(),
        path.display(),
        voltage_cols.len()
    );

    let row_count = rows.len();
    Ok(RawData {
        headers,
        rows,
        metadata: RawMetadata {
            source_file: path.to_path_buf(),
            project: ProjectType::Project1,
            system_id: system_id_from_path(path),
            group_id: None,
            data_type: None,
            bank_id: bank_id_from_path(path),
            time_range,
            row_count,
        },
    })
}

/// Header-only precheck: all mandatory aggregates present plus at least one
/// `V<n>` cell column. Never fails hard; problems are logged and reported as
/// `false`.
pub fn validate_csv_format(path: &Path, config: &PipelineConfig) -> bool {
    let headers = match read_headers(path, &config.project_one_encoding) {
        Ok(h) => h,
        Err(e) => {
            warn!("Cannot validate {}: {}", path.display(), e);
            return false;
        }
    };

    let missing: Vec<&str> = MANDATORY_HEADERS
        .iter()
        .copied()
        .filter(|name| !headers.iter().any(|h| h == name))
        .collect();
    if !missing.is_empty() {
        warn!(
            "{} is missing mandatory headers: {:?}",
            path.display(),
            missing
        );
        return false;
    }

    if !headers.iter().any(|h| CELL_VOLTAGE_RE.is_match(h)) {
        warn!("{} has no per-cell voltage columns", path.display());
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn utf8_config(cell_count: usize) -> PipelineConfig {
        PipelineConfig {
            cell_count,
            project_one_encoding: "UTF-8".to_string(),
            ..Default::default()
        }
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn cell_arrays_always_have_configured_length() {
        let dir = TempDir::new().unwrap();
        // Three V columns, two T columns, no SOC/SOH cells.
        let path = write_file(
            &dir,
            "Bank1.csv",
            "时间,总电压,总电流,SOC,SOH,V1,V2,V3,T1,T2\n\
             1/5/2024 10:00,48.5,10.2,85,99,3.31,3.30,3.29,25.5,26.0\n",
        );
        let raw = parse_file(&path, &utf8_config(5)).unwrap();
        assert_eq!(raw.rows.len(), 1);
        let row = &raw.rows[0];
        assert_eq!(row.cell_voltages.len(), 5);
        assert_eq!(row.cell_temperatures.len(), 5);
        assert_eq!(row.cell_socs.len(), 5);
        assert_eq!(row.cell_sohs.len(), 5);
        assert_eq!(row.cell_voltages[..3], [Some(3.31), Some(3.30), Some(3.29)]);
        assert_eq!(row.cell_voltages[3], None);
        assert_eq!(row.cell_socs, vec![None; 5]);
    }

    #[test]
    fn cell_columns_are_read_in_numeric_suffix_order() {
        let dir = TempDir::new().unwrap();
        // Header order is shuffled; V10 written before V2.
        let path = write_file(
            &dir,
            "Bank1.csv",
            "时间,总电压,总电流,SOC,SOH,V10,V2,V1\n\
             1/5/2024 10:00,48.5,10.2,85,99,3.10,3.02,3.01\n",
        );
        let raw = parse_file(&path, &utf8_config(3)).unwrap();
        assert_eq!(
            raw.rows[0].cell_voltages,
            vec![Some(3.01), Some(3.02), Some(3.10)]
        );
    }

    #[test]
    fn invalid_scalars_become_none_not_errors() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "Bank1.csv",
            "时间,总电压,总电流,SOC,SOH,V1\n\
             1/5/2024 10:00,not-a-number,,85,99,3.31\n\
             bad-timestamp,48.0,10.0,85,99,3.30\n",
        );
        let raw = parse_file(&path, &utf8_config(2)).unwrap();
        assert_eq!(raw.rows.len(), 2);
        assert_eq!(raw.rows[0].voltage, None);
        assert_eq!(raw.rows[0].current, None);
        assert_eq!(raw.rows[0].soc, Some(85.0));
        // Row with a bad timestamp is still parsed; placement is decided later.
        assert_eq!(raw.rows[1].voltage, Some(48.0));
    }

    #[test]
    fn time_range_tracks_min_and_max() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "Bank1.csv",
            "时间,总电压,总电流,SOC,SOH,V1\n\
             1/5/2024 12:00,48.0,10.0,85,99,3.31\n\
             1/5/2024 10:00,48.1,10.1,85,99,3.30\n\
             1/5/2024 11:00,48.2,10.2,85,99,3.29\n",
        );
        let raw = parse_file(&path, &utf8_config(1)).unwrap();
        assert_eq!(
            raw.metadata.time_range.start.to_rfc3339(),
            "2024-01-05T10:00:00+00:00"
        );
        assert_eq!(
            raw.metadata.time_range.end.to_rfc3339(),
            "2024-01-05T12:00:00+00:00"
        );
    }

    #[test]
    fn time_range_defaults_to_now_when_no_row_parses() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "Bank1.csv",
            "时间,总电压,总电流,SOC,SOH,V1\nnot-a-date,x,y,z,w,v\n",
        );
        let before = Utc::now();
        let raw = parse_file(&path, &utf8_config(1)).unwrap();
        let after = Utc::now();
        assert!(raw.metadata.time_range.start >= before);
        assert!(raw.metadata.time_range.end <= after);
    }

    #[test]
    fn identifiers_come_from_path_and_filename() {
        let dir = TempDir::new().unwrap();
        let system_dir = dir.path().join("2#");
        std::fs::create_dir(&system_dir).unwrap();
        let path = system_dir.join("Bank7.csv");
        std::fs::write(
            &path,
            "时间,总电压,总电流,SOC,SOH,V1\n1/5/2024 10:00,48,10,85,99,3.3\n",
        )
        .unwrap();

        let raw = parse_file(&path, &utf8_config(1)).unwrap();
        assert_eq!(raw.metadata.system_id, Some(crate::models::SystemId::System2));
        assert_eq!(raw.metadata.bank_id, "07");
    }

    #[test]
    fn gbk_encoded_files_decode() {
        let dir = TempDir::new().unwrap();
        let (bytes, _, _) = encoding_rs::GBK
            .encode("时间,总电压,总电流,SOC,SOH,V1\n1/5/2024 10:00,48.5,10.2,85,99,3.31\n");
        let path = dir.path().join("Bank1.csv");
        std::fs::write(&path, &bytes).unwrap();

        let config = PipelineConfig::default(); // GBK is the default encoding
        let raw = parse_file(&path, &config).unwrap();
        assert_eq!(raw.rows[0].voltage, Some(48.5));
        assert!(validate_csv_format(&path, &config));
    }

    #[test]
    fn missing_mandatory_headers_fail_the_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "Bank1.csv",
            "时间,总电压,SOC,V1\n1/5/2024 10:00,48.5,85,3.31\n",
        );
        let err = parse_file(&path, &utf8_config(1)).unwrap_err();
        match err {
            ParseError::MissingHeaders { missing, .. } => {
                assert_eq!(missing, vec!["总电流", "SOH"]);
            }
            other => panic!("expected MissingHeaders, got {:?}", other),
        }
    }

    #[test]
    fn missing_file_propagates_io_error() {
        let err = parse_file(Path::new("/no/such/Bank1.csv"), &utf8_config(1)).unwrap_err();
        assert!(matches!(err, ParseError::IoError { .. }));
    }

    #[test]
    fn format_validation_requires_mandatory_and_cell_headers() {
        let dir = TempDir::new().unwrap();
        let config = utf8_config(4);

        let good = write_file(&dir, "good.csv", "时间,总电压,总电流,SOC,SOH,V1,V2\n");
        assert!(validate_csv_format(&good, &config));

        let no_cells = write_file(&dir, "no_cells.csv", "时间,总电压,总电流,SOC,SOH\n");
        assert!(!validate_csv_format(&no_cells, &config));

        let missing = write_file(&dir, "missing.csv", "时间,总电压,SOC,V1\n");
        assert!(!validate_csv_format(&missing, &config));

        assert!(!validate_csv_format(Path::new("/no/such.csv"), &config));
    }
}
