//! Ledger persistence: a `;`-delimited text file with one row per tracked file
//!
//! The ledger is always rewritten as a whole. Writes go to a temporary file
//! in the same directory which is then renamed over the target, so a crash
//! mid-write leaves the previous ledger intact.

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::IntegrityError;
use crate::models::{LastCheck, LedgerEntry};

/// Column delimiter
pub const LEDGER_DELIMITER: u8 = b';';

/// Header row, in column order
pub const LEDGER_HEADER: [&str; 4] = ["File", "Size", "Mod-Time", "Last-Check"];

/// Flat-file store for ledger snapshots
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    /// Store backed by `path`. Nothing is touched until `load` or `save`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry. An absent ledger is an empty snapshot.
    pub fn load(&self) -> Result<Vec<LedgerEntry>, IntegrityError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No ledger at {:?}, starting from an empty one", self.path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(IntegrityError::from(e).with_path(&self.path)),
        };

        let mut reader = ReaderBuilder::new()
            .delimiter(LEDGER_DELIMITER)
            .has_headers(true)
            .from_reader(BufReader::new(file));

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| IntegrityError::from(e).with_path(&self.path))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let entry = entry_from_record(&record)
                .map_err(|msg| IntegrityError::ledger_corrupt(self.path.clone(), line, msg))?;
            entries.push(entry);
        }

        log::debug!("Loaded {} ledger entries from {:?}", entries.len(), self.path);
        Ok(entries)
    }

    /// Replace the ledger with `entries`
    pub fn save(&self, entries: &[LedgerEntry]) -> Result<(), IntegrityError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp = NamedTempFile::new_in(dir)
            .map_err(|e| IntegrityError::from(e).with_path(dir))?;

        {
            let mut writer = WriterBuilder::new()
                .delimiter(LEDGER_DELIMITER)
                .terminator(Terminator::Any(b'\n'))
                .from_writer(&mut temp);

            writer.write_record(LEDGER_HEADER)?;
            for entry in entries {
                writer.write_record(entry_to_record(entry)?)?;
            }
            writer.flush()?;
        }
        temp.flush()?;
        temp.as_file().sync_all()?;

        // Keep the permissions of the ledger being replaced
        if let Ok(metadata) = fs::metadata(&self.path) {
            if let Err(e) = temp.as_file().set_permissions(metadata.permissions()) {
                log::debug!("Cannot copy permissions of {:?}: {}", self.path, e);
            }
        }

        temp.persist(&self.path)
            .map_err(|e| IntegrityError::from(e.error).with_path(&self.path))?;

        log::debug!("Saved {} ledger entries to {:?}", entries.len(), self.path);
        Ok(())
    }
}

/// Map a ledger row onto an entry
fn entry_from_record(record: &StringRecord) -> Result<LedgerEntry, String> {
    if record.len() != LEDGER_HEADER.len() {
        return Err(format!(
            "expected {} columns, found {}",
            LEDGER_HEADER.len(),
            record.len()
        ));
    }

    let file_path = &record[0];
    if file_path.is_empty() {
        return Err("empty file path".to_string());
    }

    let file_size = record[1]
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid size {:?}: {}", &record[1], e))?;

    let file_modtime = record[2]
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|m| m.is_finite())
        .ok_or_else(|| format!("invalid modification time {:?}", &record[2]))?;

    let date_checked = LastCheck::parse(&record[3])
        .ok_or_else(|| format!("invalid last-check timestamp {:?}", &record[3]))?;

    Ok(LedgerEntry::new(file_path, file_size, file_modtime).with_date_checked(date_checked))
}

/// Map an entry onto a ledger row. Rows `load` would reject are refused.
fn entry_to_record(entry: &LedgerEntry) -> Result<[String; 4], IntegrityError> {
    if !entry.file_modtime.is_finite() {
        return Err(IntegrityError::io_error(
            Some(entry.path().to_path_buf()),
            format!("invalid modification time {}", entry.file_modtime),
        ));
    }
    Ok([
        entry.file_path.clone(),
        entry.file_size.to_string(),
        entry.file_modtime.to_string(),
        entry.date_checked.to_ledger_string(),
    ])
}
