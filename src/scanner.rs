use crate::errors::ScanError;
use crate::models::{
    DataTypeId, FileEntry, GroupId, ProjectOneStructure, ProjectTwoStructure, SystemId,
};
use crate::watcher::{PathWatcher, WatchEvent};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// `Bank7.csv`, `Bank12_export.csv`, ... captures the bank number.
static BANK_FILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Bank(\d+).*\.csv$").unwrap());

/// `voltage2_2024_03_01_0001.csv`, ... captures type tag, year, month, day.
static DATED_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]+)\d*_(\d{4})_(\d{2})_(\d{2})_\d+\.csv$").unwrap());

/// Zero-pads a captured bank number to the two-digit bank key.
pub(crate) fn bank_key(number: &str) -> String {
    format!("{:0>2}", number)
}

/// Discovers data files under the two fixed site layouts and optionally
/// watches a set of paths for changes. Scans always return a best-effort
/// structure: missing or unreadable directories at any level are logged and
/// reported as empty, never as errors.
#[derive(Default)]
pub struct FileScanner {
    watch: Option<PathWatcher>,
}

impl FileScanner {
    pub fn new() -> FileScanner {
        FileScanner { watch: None }
    }

    /// Project1 layout: `<base>/<n>#/Bank<k>*.csv`, one file per bank. Every
    /// system in the fixed set appears in the result, with an empty bank map
    /// when its directory is absent.
    pub fn scan_project_one_structure(&self, base_path: &Path) -> ProjectOneStructure {
        let mut structure = ProjectOneStructure::new();

        if !base_path.is_dir() {
            warn!(
                "Project1 base path {} is missing or unreadable, returning empty structure",
                base_path.display()
            );
            for system in SystemId::ALL {
                structure.insert(system, BTreeMap::new());
            }
            return structure;
        }

        for system in SystemId::ALL {
            let system_dir = base_path.join(system.dir_name());
            let mut banks = BTreeMap::new();

            if system_dir.is_dir() {
                for (name, path) in read_dir_entries(&system_dir) {
                    let Some(caps) = BANK_FILE_RE.captures(&name) else {
                        continue;
                    };
                    if let Some(entry) = stat_entry(&path) {
                        banks.insert(bank_key(&caps[1]), entry);
                    }
                }
            } else {
                debug!(
                    "System directory {} not present, recording empty bank map",
                    system_dir.display()
                );
            }

            structure.insert(system, banks);
        }

        structure
    }

    /// Project2 layout: `<base>/group<n>/<type>/<type><k>_YYYY_MM_DD_<seq>.csv`.
    /// The captured date becomes the `YYYY-MM-DD` key. Files whose type tag
    /// does not match their directory are skipped.
    pub fn scan_project_two_structure(&self, base_path: &Path) -> ProjectTwoStructure {
        let mut structure = ProjectTwoStructure::new();

        if !base_path.is_dir() {
            warn!(
                "Project2 base path {} is missing or unreadable, returning empty structure",
                base_path.display()
            );
            for group in GroupId::ALL {
                structure.insert(group, empty_group());
            }
            return structure;
        }

        for group in GroupId::ALL {
            let group_dir = base_path.join(group.dir_name());
            let mut types = BTreeMap::new();

            for data_type in DataTypeId::ALL {
                let type_dir = group_dir.join(data_type.as_str());
                let mut dates = BTreeMap::new();

                if type_dir.is_dir() {
                    for (name, path) in read_dir_entries(&type_dir) {
                        let Some(caps) = DATED_FILE_RE.captures(&name) else {
                            continue;
                        };
                        if &caps[1] != data_type.as_str() {
                            continue;
                        }
                        if let Some(entry) = stat_entry(&path) {
                            let date_key = format!("{}-{}-{}", &caps[2], &caps[3], &caps[4]);
                            dates.insert(date_key, entry);
                        }
                    }
                }

                types.insert(data_type, dates);
            }

            structure.insert(group, types);
        }

        structure
    }

    /// Installs a watch over `paths`, replacing any previous watch first; a
    /// scanner holds at most one active watch. The callback fires on the
    /// watcher's listener thread.
    pub fn watch_paths<F>(&mut self, paths: &[PathBuf], callback: F) -> Result<(), ScanError>
    where
        F: Fn(WatchEvent) + Send + 'static,
    {
        self.stop_watching();
        self.watch = Some(PathWatcher::spawn(paths, callback)?);
        Ok(())
    }

    /// Stops the active watch, releasing its OS resources before returning.
    /// Safe to call when nothing is being watched.
    pub fn stop_watching(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watch.is_some()
    }
}

fn empty_group() -> BTreeMap<DataTypeId, BTreeMap<String, FileEntry>> {
    DataTypeId::ALL
        .iter()
        .map(|dt| (*dt, BTreeMap::new()))
        .collect()
}

/// Lists a directory, logging and skipping unreadable entries.
fn read_dir_entries(dir: &Path) -> Vec<(String, PathBuf)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read directory {}: {}. Treating as empty.", dir.display(), e);
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for entry_result in entries {
        match entry_result {
            Ok(entry) => {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    out.push((name.to_string(), path));
                }
            }
            Err(e) => {
                warn!("Failed to read entry in {}: {}. Skipping.", dir.display(), e);
            }
        }
    }
    out
}

fn stat_entry(path: &Path) -> Option<FileEntry> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to stat {}: {}. Skipping.", path.display(), e);
            return None;
        }
    };
    let last_modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Some(FileEntry {
        file_path: path.to_path_buf(),
        last_modified,
        file_size: metadata.len(),
    })
}
