pub mod project_one;
pub mod project_two;

use crate::errors::ParseError;
use crate::models::{GroupId, ProjectType, SystemId};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use csv::StringRecord;
use encoding_rs::{Encoding, UTF_8};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub(crate) static CELL_VOLTAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^V(\d+)$").unwrap());
pub(crate) static CELL_TEMP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^T(\d+)$").unwrap());
pub(crate) static CELL_SOC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^SOC(\d+)$").unwrap());
pub(crate) static CELL_SOH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^SOH(\d+)$").unwrap());

static SYSTEM_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+#$").unwrap());
static BANK_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Bank(\d+)").unwrap());

/// Largest chunk read when only the header row is needed. Wide exports carry
/// a few hundred columns; the header always fits well inside this.
const HEADER_PROBE_BYTES: u64 = 256 * 1024;

/// Decodes raw file bytes with the configured encoding, falling back to UTF-8
/// when the label is unknown. Undecodable sequences become replacement
/// characters rather than failing the file.
pub(crate) fn decode_bytes(bytes: &[u8], encoding_label: &str) -> String {
    let encoding = Encoding::for_label(encoding_label.as_bytes()).unwrap_or(UTF_8);
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!("Some bytes could not be decoded as {}", encoding.name());
    }
    text.into_owned()
}

/// Tolerant numeric field parse: missing, empty, or non-numeric values all
/// become `None`.
pub(crate) fn parse_numeric(field: Option<&str>) -> Option<f64> {
    let trimmed = field?.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Column indices of headers matching the given cell pattern, ordered by the
/// numeric suffix. The sort is numeric, not lexicographic: V2 precedes V10.
pub(crate) fn sorted_cell_columns(headers: &[String], pattern: &Regex) -> Vec<usize> {
    let mut cols: Vec<(u32, usize)> = headers
        .iter()
        .enumerate()
        .filter_map(|(index, header)| {
            pattern
                .captures(header)
                .and_then(|caps| caps[1].parse::<u32>().ok())
                .map(|suffix| (suffix, index))
        })
        .collect();
    cols.sort_by_key(|(suffix, _)| *suffix);
    cols.into_iter().map(|(_, index)| index).collect()
}

/// Extracts one cell array: takes at most `cell_count` columns in suffix
/// order, then pads with `None` so slot `i` is always cell `i + 1`.
pub(crate) fn extract_cells(
    record: &StringRecord,
    columns: &[usize],
    cell_count: usize,
) -> Vec<Option<f64>> {
    let mut values: Vec<Option<f64>> = columns
        .iter()
        .take(cell_count)
        .map(|&index| parse_numeric(record.get(index)))
        .collect();
    values.resize(cell_count, None);
    values
}

/// Reads and decodes only the leading chunk of a file and returns its trimmed
/// header row.
pub(crate) fn read_headers(path: &Path, encoding_label: &str) -> Result<Vec<String>, ParseError> {
    let file = File::open(path).map_err(|e| ParseError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut bytes = Vec::new();
    file.take(HEADER_PROBE_BYTES)
        .read_to_end(&mut bytes)
        .map_err(|e| ParseError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;

    let text = decode_bytes(&bytes, encoding_label);
    let first_line = text.lines().next().unwrap_or("");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(first_line.as_bytes());

    let mut record = StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Ok(record.iter().map(|h| h.trim().to_string()).collect()),
        Ok(false) => Ok(Vec::new()),
        Err(e) => Err(ParseError::HeaderReadError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Finds the system a file belongs to by scanning its path for a `<digits>#`
/// segment. Segments outside the known set count as absent.
pub(crate) fn system_id_from_path(path: &Path) -> Option<SystemId> {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .filter(|segment| SYSTEM_SEGMENT_RE.is_match(segment))
        .find_map(SystemId::from_segment)
}

pub(crate) fn group_id_from_path(path: &Path) -> Option<GroupId> {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .find_map(GroupId::from_segment)
}

/// Bank id from a `Bank<n>` token in the filename, zero-padded to two digits;
/// "unknown" when the token is absent.
pub(crate) fn bank_id_from_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|name| BANK_NAME_RE.captures(name))
        .map(|caps| format!("{:0>2}", &caps[1]))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Project1 timestamps: `M/D/YYYY HH:mm` with no zero-padding guaranteed.
/// chrono accepts one- or two-digit fields for `%m`/`%d`/`%H`.
pub(crate) fn parse_project_one_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), "%m/%d/%Y %H:%M")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Project2 timestamps: `YYYY-MM-DD HH:mm:ss`.
pub(crate) fn parse_project_two_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub(crate) fn parse_row_timestamp(project: ProjectType, value: &str) -> Option<DateTime<Utc>> {
    match project {
        ProjectType::Project1 => parse_project_one_timestamp(value),
        ProjectType::Project2 => parse_project_two_timestamp(value),
    }
}
