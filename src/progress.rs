//! Progress reporting module for check runs
//!
//! This module provides data structures and utilities for reporting
//! verification progress to external callers via stderr, one JSON
//! object per line. The reporter is created by the caller and handed to the
//! driver; nothing here is global.

use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::CheckConfig;
use crate::error::IntegrityError;
use crate::models::CheckResult;

/// Start message sent once the selection is known
#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    /// Message type identifier
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Collection root
    pub root: String,
    /// Ledger file
    pub ledger: String,
    /// Entries in the reconciled collection
    pub total: usize,
    /// Entries selected for verification
    pub limit: usize,
    /// Stop after this many verified entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap: Option<usize>,
}

impl StartMessage {
    /// Create a new start message
    pub fn new(
        seq: u64,
        ts: u64,
        root: String,
        ledger: String,
        total: usize,
        limit: usize,
        cap: Option<usize>,
    ) -> Self {
        Self {
            msg_type: "start",
            seq,
            ts,
            root,
            ledger,
            total,
            limit,
            cap,
        }
    }
}

/// Progress message sent while verifying
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    /// Message type identifier ("p" for progress)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// 1-based position of the current item
    #[serde(rename = "i")]
    pub index: usize,
    /// Items selected for this run
    #[serde(rename = "n")]
    pub limit: usize,
    /// File being verified
    pub file: String,
}

/// Error message sent when the run hits a fatal error
#[derive(Debug, Clone, Serialize)]
pub struct ErrorProgressMessage {
    /// Message type identifier ("err" for error)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Error type/category
    pub error_type: String,
    /// Error message description
    pub message: String,
    /// Path that caused the error (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorProgressMessage {
    /// Create a new error progress message
    pub fn new(
        seq: u64,
        ts: u64,
        error_type: String,
        message: String,
        path: Option<String>,
    ) -> Self {
        Self {
            msg_type: "err",
            seq,
            ts,
            error_type,
            message,
            path,
        }
    }
}

/// Done message sent when the run completes
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    /// Message type identifier ("done" for completion)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Entries in the reconciled collection
    #[serde(rename = "te")]
    pub total_entries: u64,
    /// Entries verified
    #[serde(rename = "vf")]
    pub verified: u64,
    /// Selected entries that vanished before verification
    #[serde(rename = "vn")]
    pub vanished: u64,
    /// Intermediate ledger saves
    #[serde(rename = "cp")]
    pub checkpoints: u64,
    /// Total run duration in milliseconds
    pub ms: u64,
}

/// Progress reporter for outputting run progress to stderr
///
/// Handles timing, sequence numbers and formatting of the message types.
pub struct ProgressReporter {
    /// Whether progress reporting is enabled
    enabled: bool,
    /// Reporting interval in milliseconds
    interval_ms: u64,
    /// Last report time
    last_report: std::cell::Cell<Option<Instant>>,
    /// Sequence number for messages
    seq: AtomicU64,
    /// Start time of the reporter
    start_time: Instant,
}

impl ProgressReporter {
    /// Create a new ProgressReporter
    ///
    /// # Arguments
    /// * `enabled` - Whether progress reporting is enabled
    /// * `interval_ms` - Minimum interval between progress messages in milliseconds
    pub fn new(enabled: bool, interval_ms: u64) -> Self {
        Self {
            enabled,
            interval_ms,
            last_report: std::cell::Cell::new(None),
            seq: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// A reporter that never writes anything
    pub fn disabled() -> Self {
        Self::new(false, 0)
    }

    /// Check if enough time has passed since the last progress message
    pub fn should_report(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_report.get() {
            None => true,
            Some(last) => last.elapsed().as_millis() as u64 >= self.interval_ms,
        }
    }

    /// Get the next sequence number (monotonically increasing)
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the current timestamp in milliseconds since reporter creation
    pub fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Output a serializable message to stderr as JSON
    pub fn output_to_stderr<T: Serialize>(&self, msg: &T) {
        if let Ok(json) = serde_json::to_string(msg) {
            eprintln!("{}", json);
            std::io::stderr().flush().ok();
        }
    }

    /// Report the start of verification
    pub fn report_start(&self, config: &CheckConfig, total: usize, limit: usize, cap: Option<usize>) {
        if !self.enabled {
            return;
        }

        let msg = StartMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            config.root.to_string_lossy().to_string(),
            config.ledger_path.to_string_lossy().to_string(),
            total,
            limit,
            cap,
        );

        self.output_to_stderr(&msg);
    }

    /// Report the item about to be verified.
    ///
    /// Returns true if a message was actually sent (respects interval timing).
    pub fn report_progress(&self, index: usize, limit: usize, file: &str) -> bool {
        if !self.should_report() {
            return false;
        }

        let msg = ProgressMessage {
            msg_type: "p",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            index,
            limit,
            file: file.to_string(),
        };

        self.output_to_stderr(&msg);
        self.last_report.set(Some(Instant::now()));
        true
    }

    /// Report a fatal error
    ///
    /// Outputs an ErrorProgressMessage immediately (ignores interval timing).
    pub fn report_error(&self, error: &IntegrityError) {
        if !self.enabled {
            return;
        }

        let msg = ErrorProgressMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            format!("{:?}", error.kind),
            error.message.clone(),
            error.path.as_ref().map(|p| p.to_string_lossy().to_string()),
        );

        self.output_to_stderr(&msg);
    }

    /// Report run completion
    pub fn report_done(&self, result: &CheckResult) {
        if !self.enabled {
            return;
        }

        let msg = DoneMessage {
            msg_type: "done",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            total_entries: result.total_entries,
            verified: result.verified,
            vanished: result.vanished,
            checkpoints: result.checkpoints,
            ms: result.duration_ms,
        };

        self.output_to_stderr(&msg);
    }

    /// Check if the reporter is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
