//! Core data models for the integrity checker

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Timestamp layout written to the ledger
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Timestamp layout accepted when reading (fraction optional)
pub const DATE_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Textual form of the "never checked" sentinel
pub const NEVER_CHECKED: &str = "1900-01-01 00:00:00";

/// The date-time the sentinel stands for
pub fn never_checked_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Last successful verification of an entry.
///
/// `Never` sorts before every real timestamp, so ordering over ledger
/// entries stays total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LastCheck {
    /// No successful verification on record
    #[default]
    Never,
    /// Local wall-clock time of the last successful verification
    At(NaiveDateTime),
}

impl LastCheck {
    /// Parse a ledger timestamp, mapping the sentinel back to `Never`
    pub fn parse(value: &str) -> Option<Self> {
        let parsed = NaiveDateTime::parse_from_str(value.trim(), DATE_PARSE_FORMAT).ok()?;
        if parsed <= never_checked_datetime() {
            Some(LastCheck::Never)
        } else {
            Some(LastCheck::At(parsed))
        }
    }

    /// Ledger representation
    pub fn to_ledger_string(&self) -> String {
        match self {
            LastCheck::Never => NEVER_CHECKED.to_string(),
            LastCheck::At(at) => at.format(DATE_FORMAT).to_string(),
        }
    }

    /// Comparable date-time, with `Never` mapped to the sentinel
    pub fn as_datetime(&self) -> NaiveDateTime {
        match self {
            LastCheck::Never => never_checked_datetime(),
            LastCheck::At(at) => *at,
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, LastCheck::Never)
    }
}

impl fmt::Display for LastCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ledger_string())
    }
}

/// Reconciliation outcome for a scanned path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Not present in the previous ledger
    #[default]
    New,
    /// Present, but size or modtime changed
    Modified,
    /// Present with the same identity; history kept
    Unchanged,
    /// In the previous ledger, now missing on disk
    Deleted,
}

impl EntryStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::New => "new",
            EntryStatus::Modified => "modified",
            EntryStatus::Unchanged => "unchanged",
            EntryStatus::Deleted => "deleted",
        }
    }
}

/// A tracked file: its identity on disk and when it last passed verification
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// Path of the file, unique within a ledger
    pub file_path: String,
    /// Size in bytes
    pub file_size: u64,
    /// Modification time in seconds since the Unix epoch
    pub file_modtime: f64,
    /// Last successful verification
    pub date_checked: LastCheck,
}

impl LedgerEntry {
    /// Create a never-checked entry
    pub fn new(file_path: impl Into<String>, file_size: u64, file_modtime: f64) -> Self {
        Self {
            file_path: file_path.into(),
            file_size,
            file_modtime,
            date_checked: LastCheck::Never,
        }
    }

    /// Set the last check
    pub fn with_date_checked(mut self, date_checked: LastCheck) -> Self {
        self.date_checked = date_checked;
        self
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.file_path)
    }

    /// Record a successful verification. Never moves the timestamp backwards.
    pub fn mark_checked(&mut self, now: NaiveDateTime) {
        self.date_checked = self.date_checked.max(LastCheck::At(now));
    }

    /// Whether `other` describes the same file content within `modtime_tolerance` seconds
    pub fn same_identity(&self, other: &LedgerEntry, modtime_tolerance: f64) -> bool {
        self.file_size == other.file_size
            && (self.file_modtime - other.file_modtime).abs() <= modtime_tolerance
    }
}

/// Summary of a check run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckResult {
    /// Number of entries in the reconciled collection
    pub total_entries: u64,
    /// Directories traversed by the scan
    pub total_dirs: u64,
    /// Files not present in the previous ledger
    pub new_entries: u64,
    /// Files whose size or modtime changed
    pub modified_entries: u64,
    /// Files whose history was kept
    pub unchanged_entries: u64,
    /// Ledger entries dropped because the file is gone
    pub removed_entries: u64,
    /// Items due by staleness
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_by_age: Option<usize>,
    /// Items allowed by the coverage percentage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_by_percentage: Option<usize>,
    /// Items selected for this run
    pub effective_limit: usize,
    /// Items that passed verification
    pub verified: u64,
    /// Selected items that disappeared before they could be verified
    pub vanished: u64,
    /// Intermediate ledger saves
    pub checkpoints: u64,
    /// Total run duration in milliseconds
    pub duration_ms: u64,
}

impl CheckResult {
    /// Create a new empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing was selected for verification
    pub fn is_noop(&self) -> bool {
        self.effective_limit == 0
    }
}
