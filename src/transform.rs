use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::models::{
    BankReadings, BankStatistics, BankTimeSeries, CellReadings, ProjectSummary, ProjectType,
    StandardBatteryData, TimeRange, TimeSeriesPoint, ValueStats,
};
use crate::parsers::parse_row_timestamp;
use crate::raw::{RawData, RawRow};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::BTreeMap;

/// Outcome of converting one raw row. Distinguishing a produced point from a
/// logged skip lets the summary report exact valid/invalid counts without
/// sentinel values.
enum RowOutcome {
    Point(TimeSeriesPoint),
    Skipped,
}

/// Plausible physical ranges used by the accuracy score. A sample outside its
/// range still flows through; it only lowers the score.
const VOLTAGE_RANGE: (f64, f64) = (0.0, 1500.0);
const CURRENT_RANGE: (f64, f64) = (-5000.0, 5000.0);
const PERCENT_RANGE: (f64, f64) = (0.0, 100.0);
const TEMPERATURE_RANGE: (f64, f64) = (-40.0, 85.0);

/// Converts parsed raw datasets into the standardized, time-sorted model.
pub struct DataTransformer {
    cell_count: usize,
}

impl DataTransformer {
    pub fn new(config: &PipelineConfig) -> DataTransformer {
        DataTransformer {
            cell_count: config.cell_count,
        }
    }

    /// Project1 files are single-bank: one `BankTimeSeries` per file, points
    /// sorted by timestamp regardless of source order, null scalars coerced
    /// to zero so every point has fully populated bank readings.
    pub fn transform_project_one(
        &self,
        raw: &RawData,
    ) -> Result<StandardBatteryData, PipelineError> {
        let total_records = raw.rows.len();
        let mut points = Vec::with_capacity(total_records);
        let mut skipped = 0usize;

        for (row_index, row) in raw.rows.iter().enumerate() {
            match self.transform_row(ProjectType::Project1, row) {
                RowOutcome::Point(point) => points.push(point),
                RowOutcome::Skipped => {
                    skipped += 1;
                    warn!(
                        "Skipping row {} of {}: unplaceable timestamp '{}'",
                        row_index + 1,
                        raw.metadata.source_file.display(),
                        row.timestamp
                    );
                }
            }
        }

        points.sort_by_key(|p| p.timestamp);

        let statistics = compute_statistics(&points);
        let summary = compute_summary(total_records, skipped, &points);

        let system_label = raw
            .metadata
            .system_id
            .map(|s| s.dir_name().trim_end_matches('#').to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let bank_id = raw.metadata.bank_id.clone();

        debug!(
            "Transformed {} into {} points ({} skipped)",
            raw.metadata.source_file.display(),
            points.len(),
            skipped
        );

        Ok(StandardBatteryData {
            project_id: format!("project1-{}-{}", system_label, bank_id),
            project_type: ProjectType::Project1,
            system_id: raw.metadata.system_id,
            group_id: None,
            time_range: raw.metadata.time_range,
            banks: vec![BankTimeSeries {
                bank_id,
                data_points: points,
                statistics,
            }],
            summary,
        })
    }

    /// Merges the per-data-type Project2 datasets of one group into a single
    /// unified series, aligning rows on timestamp. A timestamp present in one
    /// data type but absent in another still yields a point, with all-null
    /// cell slots for the missing quantity.
    pub fn transform_project_two(
        &self,
        raws: &[RawData],
    ) -> Result<StandardBatteryData, PipelineError> {
        if raws.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let group_id = raws.iter().find_map(|r| r.metadata.group_id);

        let mut slots: BTreeMap<DateTime<Utc>, RawRow> = BTreeMap::new();
        let mut total_records = 0usize;
        let mut skipped = 0usize;

        for raw in raws {
            let data_type = raw.metadata.data_type;
            total_records += raw.rows.len();

            for row in &raw.rows {
                let Some(ts) = parse_row_timestamp(ProjectType::Project2, &row.timestamp) else {
                    skipped += 1;
                    warn!(
                        "Skipping {} row with unplaceable timestamp '{}' in {}",
                        data_type.map(|d| d.as_str()).unwrap_or("unknown"),
                        row.timestamp,
                        raw.metadata.source_file.display()
                    );
                    continue;
                };

                let slot = slots
                    .entry(ts)
                    .or_insert_with(|| RawRow::empty(row.timestamp.clone(), self.cell_count));
                merge_row_into(slot, row);
            }
        }

        let points: Vec<TimeSeriesPoint> = slots
            .into_iter()
            .map(|(ts, row)| self.point_from_row(ts, &row))
            .collect();

        let statistics = compute_statistics(&points);
        let summary = compute_summary(total_records, skipped, &points);

        let time_range = match (points.first(), points.last()) {
            (Some(first), Some(last)) => TimeRange {
                start: first.timestamp,
                end: last.timestamp,
            },
            _ => TimeRange::empty_now(),
        };

        let group_label = group_id
            .map(|g| g.dir_name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(StandardBatteryData {
            project_id: format!("project2-{}", group_label),
            project_type: ProjectType::Project2,
            system_id: None,
            group_id,
            time_range,
            banks: vec![BankTimeSeries {
                bank_id: group_label,
                data_points: points,
                statistics,
            }],
            summary,
        })
    }

    /// Combines standardized datasets spanning multiple files or periods of
    /// the same project: banks with the same id are concatenated and
    /// re-sorted, statistics and summary recomputed over the merged points.
    pub fn merge_time_series(
        &self,
        datasets: &[StandardBatteryData],
    ) -> Result<StandardBatteryData, PipelineError> {
        let Some(first) = datasets.first() else {
            return Err(PipelineError::EmptyInput);
        };

        for other in &datasets[1..] {
            if other.project_type != first.project_type {
                return Err(PipelineError::ProjectMismatch {
                    expected: first.project_type.as_str().to_string(),
                    found: other.project_type.as_str().to_string(),
                });
            }
        }

        // BTreeMap keeps bank order stable across runs.
        let mut merged: BTreeMap<String, Vec<TimeSeriesPoint>> = BTreeMap::new();
        for dataset in datasets {
            for bank in &dataset.banks {
                merged
                    .entry(bank.bank_id.clone())
                    .or_default()
                    .extend(bank.data_points.iter().cloned());
            }
        }

        let banks: Vec<BankTimeSeries> = merged
            .into_iter()
            .map(|(bank_id, mut points)| {
                points.sort_by_key(|p| p.timestamp);
                let statistics = compute_statistics(&points);
                BankTimeSeries {
                    bank_id,
                    data_points: points,
                    statistics,
                }
            })
            .collect();

        let total_records: usize = datasets.iter().map(|d| d.summary.total_records).sum();
        let error_records: usize = datasets.iter().map(|d| d.summary.error_records).sum();
        let all_points: Vec<TimeSeriesPoint> = banks
            .iter()
            .flat_map(|b| b.data_points.iter().cloned())
            .collect();
        let summary = compute_summary(total_records, error_records, &all_points);

        let start = datasets
            .iter()
            .map(|d| d.time_range.start)
            .min()
            .unwrap_or_else(Utc::now);
        let end = datasets
            .iter()
            .map(|d| d.time_range.end)
            .max()
            .unwrap_or_else(Utc::now);

        Ok(StandardBatteryData {
            project_id: first.project_id.clone(),
            project_type: first.project_type,
            system_id: first.system_id,
            group_id: first.group_id,
            time_range: TimeRange { start, end },
            banks,
            summary,
        })
    }

    /// Structural acceptance gate used before handing data onward. Violations
    /// return false; this never panics or errors.
    pub fn validate_transform_result(&self, data: &StandardBatteryData) -> bool {
        if data.project_id.is_empty() {
            warn!("Rejecting transform result: empty project id");
            return false;
        }

        match data.project_type {
            ProjectType::Project1 => {
                if data.system_id.is_none() {
                    warn!("Rejecting project1 result without a system id");
                    return false;
                }
            }
            ProjectType::Project2 => {
                if data.group_id.is_none() {
                    warn!("Rejecting project2 result without a group id");
                    return false;
                }
            }
        }

        if data.banks.is_empty() {
            warn!("Rejecting transform result: no banks");
            return false;
        }

        for bank in &data.banks {
            let sorted = bank
                .data_points
                .windows(2)
                .all(|pair| pair[0].timestamp <= pair[1].timestamp);
            if !sorted {
                warn!(
                    "Rejecting transform result: bank {} is not timestamp-sorted",
                    bank.bank_id
                );
                return false;
            }
        }

        true
    }

    fn transform_row(&self, project: ProjectType, row: &RawRow) -> RowOutcome {
        match parse_row_timestamp(project, &row.timestamp) {
            Some(ts) => RowOutcome::Point(self.point_from_row(ts, row)),
            None => RowOutcome::Skipped,
        }
    }

    fn point_from_row(&self, timestamp: DateTime<Utc>, row: &RawRow) -> TimeSeriesPoint {
        let voltage = row.voltage.unwrap_or(0.0);
        let current = row.current.unwrap_or(0.0);
        let temperature = mean_of_present(&row.cell_temperatures);

        TimeSeriesPoint {
            timestamp,
            bank: BankReadings {
                voltage,
                current,
                soc: row.soc.unwrap_or(0.0),
                soh: row.soh.unwrap_or(0.0),
                power: voltage * current,
                temperature,
            },
            cells: CellReadings {
                voltages: resized(&row.cell_voltages, self.cell_count),
                temperatures: resized(&row.cell_temperatures, self.cell_count),
                socs: resized(&row.cell_socs, self.cell_count),
                sohs: resized(&row.cell_sohs, self.cell_count),
            },
        }
    }
}

/// Folds one per-data-type row into the accumulator slot for its timestamp.
/// Scalars and cell arrays only overwrite when the incoming row actually
/// carries them, so datasets of different types never erase each other.
fn merge_row_into(slot: &mut RawRow, row: &RawRow) {
    if row.voltage.is_some() {
        slot.voltage = row.voltage;
    }
    if row.current.is_some() {
        slot.current = row.current;
    }
    if row.soc.is_some() {
        slot.soc = row.soc;
    }
    if row.soh.is_some() {
        slot.soh = row.soh;
    }
    merge_cells(&mut slot.cell_voltages, &row.cell_voltages);
    merge_cells(&mut slot.cell_temperatures, &row.cell_temperatures);
    merge_cells(&mut slot.cell_socs, &row.cell_socs);
    merge_cells(&mut slot.cell_sohs, &row.cell_sohs);
}

fn merge_cells(slot: &mut Vec<Option<f64>>, incoming: &[Option<f64>]) {
    if incoming.iter().any(|v| v.is_some()) {
        *slot = incoming.to_vec();
    }
}

/// Arithmetic mean of the non-null slots, zero when every slot is null.
fn mean_of_present(values: &[Option<f64>]) -> f64 {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f64>() / present.len() as f64
    }
}

fn resized(values: &[Option<f64>], cell_count: usize) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    out.resize(cell_count, None);
    out.truncate(cell_count);
    out
}

fn value_stats<I: Iterator<Item = f64>>(values: I) -> ValueStats {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        count += 1;
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }
    if count == 0 {
        ValueStats::default()
    } else {
        ValueStats {
            avg: sum / count as f64,
            min,
            max,
        }
    }
}

fn compute_statistics(points: &[TimeSeriesPoint]) -> BankStatistics {
    BankStatistics {
        voltage: value_stats(points.iter().map(|p| p.bank.voltage)),
        current: value_stats(points.iter().map(|p| p.bank.current)),
        soc: value_stats(points.iter().map(|p| p.bank.soc)),
        soh: value_stats(points.iter().map(|p| p.bank.soh)),
        temperature: value_stats(points.iter().map(|p| p.bank.temperature)),
    }
}

fn in_range(value: f64, range: (f64, f64)) -> bool {
    value >= range.0 && value <= range.1
}

/// Summary with the three quality scores.
///
/// completeness = valid / total rows; accuracy = fraction of scalar samples
/// inside plausible physical ranges; consistency = fraction of non-null cell
/// slots. Each score is 1.0 on empty input so an empty (but well-formed)
/// conversion is not penalized.
fn compute_summary(
    total_records: usize,
    error_records: usize,
    points: &[TimeSeriesPoint],
) -> ProjectSummary {
    let valid_records = total_records.saturating_sub(error_records);

    let completeness = if total_records == 0 {
        1.0
    } else {
        valid_records as f64 / total_records as f64
    };

    let mut in_range_samples = 0usize;
    let mut total_samples = 0usize;
    let mut present_slots = 0usize;
    let mut total_slots = 0usize;

    for point in points {
        let checks = [
            (point.bank.voltage, VOLTAGE_RANGE),
            (point.bank.current, CURRENT_RANGE),
            (point.bank.soc, PERCENT_RANGE),
            (point.bank.soh, PERCENT_RANGE),
            (point.bank.temperature, TEMPERATURE_RANGE),
        ];
        total_samples += checks.len();
        in_range_samples += checks.iter().filter(|(v, r)| in_range(*v, *r)).count();

        for array in [
            &point.cells.voltages,
            &point.cells.temperatures,
            &point.cells.socs,
            &point.cells.sohs,
        ] {
            total_slots += array.len();
            present_slots += array.iter().filter(|v| v.is_some()).count();
        }
    }

    let accuracy = if total_samples == 0 {
        1.0
    } else {
        in_range_samples as f64 / total_samples as f64
    };
    let consistency = if total_slots == 0 {
        1.0
    } else {
        present_slots as f64 / total_slots as f64
    };

    ProjectSummary {
        total_records,
        valid_records,
        error_records,
        completeness,
        accuracy,
        consistency,
    }
}
