//! Scanner module - walks the collection and reconciles it with the ledger

use std::collections::HashMap;
use std::path::Path;
use std::time::{Instant, UNIX_EPOCH};
use walkdir::WalkDir;

use crate::config::CheckConfig;
use crate::error::IntegrityError;
use crate::models::{EntryStatus, LedgerEntry};

/// Working snapshot produced by a scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Reconciled entries, one per file found on disk
    pub entries: Vec<LedgerEntry>,
    /// Number of files not present in the previous ledger
    pub new_files: u64,
    /// Number of files whose size or modtime changed
    pub modified_files: u64,
    /// Number of files whose verification history was kept
    pub unchanged_files: u64,
    /// Ledger paths that no longer exist on disk
    pub removed_paths: Vec<String>,
    /// Number of directories traversed
    pub total_dirs: u64,
}

impl ScanReport {
    pub fn total_files(&self) -> u64 {
        self.entries.len() as u64
    }

    fn record(&mut self, status: EntryStatus) {
        match status {
            EntryStatus::New => self.new_files += 1,
            EntryStatus::Modified => self.modified_files += 1,
            EntryStatus::Unchanged => self.unchanged_files += 1,
            EntryStatus::Deleted => {}
        }
    }
}

/// Walk `config.root` and reconcile every matching file against `previous`.
///
/// Any traversal error aborts the scan.
pub fn scan_collection(
    config: &CheckConfig,
    previous: Vec<LedgerEntry>,
) -> Result<ScanReport, IntegrityError> {
    let start = Instant::now();
    let root = &config.root;
    if !root.exists() {
        return Err(IntegrityError::not_found(root.clone()));
    }

    let mut index: HashMap<String, LedgerEntry> = previous
        .into_iter()
        .map(|entry| (entry.file_path.clone(), entry))
        .collect();
    let mut report = ScanReport::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || entry
                    .file_name()
                    .to_str()
                    .map_or(true, |name| !config.should_ignore_dir(name))
        });

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() {
            report.total_dirs += 1;
            continue;
        }
        if !is_regular_file(&entry) || !has_wanted_extension(entry.path(), config) {
            continue;
        }

        let fresh = read_entry(entry.path())?;
        let stored = index.remove(&fresh.file_path);
        let (reconciled, status) = reconcile(fresh, stored, config);
        log::debug!("{}: {}", status.as_str(), reconciled.file_path);
        report.record(status);
        report.entries.push(reconciled);
    }

    report.removed_paths = index.into_keys().collect();
    report.removed_paths.sort();
    for path in &report.removed_paths {
        log::debug!("{}: {}", EntryStatus::Deleted.as_str(), path);
    }

    log::info!(
        "Scanned {} file(s) in {} dir(s) in {:.3}s: {} new, {} modified, {} unchanged, {} removed",
        report.total_files(),
        report.total_dirs,
        start.elapsed().as_secs_f64(),
        report.new_files,
        report.modified_files,
        report.unchanged_files,
        report.removed_paths.len()
    );

    Ok(report)
}

/// Decide whether a stored entry still describes the freshly scanned file
pub fn reconcile(
    fresh: LedgerEntry,
    stored: Option<LedgerEntry>,
    config: &CheckConfig,
) -> (LedgerEntry, EntryStatus) {
    match stored {
        None => (fresh, EntryStatus::New),
        Some(mut stored) if stored.same_identity(&fresh, config.modtime_tolerance) => {
            stored.file_modtime = fresh.file_modtime;
            (stored, EntryStatus::Unchanged)
        }
        Some(_) => (fresh, EntryStatus::Modified),
    }
}

/// Regular files, and symlinks that resolve to one
fn is_regular_file(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file())
}

fn has_wanted_extension(path: &Path, config: &CheckConfig) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| config.should_include_extension(ext))
}

/// Build a never-checked entry from the live file metadata.
///
/// Symlinks are followed. Names that are not UTF-8 are rejected.
fn read_entry(path: &Path) -> Result<LedgerEntry, IntegrityError> {
    let file_path = path
        .to_str()
        .ok_or_else(|| IntegrityError::invalid_path(path.to_path_buf()))?;
    let metadata =
        std::fs::metadata(path).map_err(|e| IntegrityError::from(e).with_path(path))?;

    let modtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    Ok(LedgerEntry::new(file_path, metadata.len(), modtime))
}
