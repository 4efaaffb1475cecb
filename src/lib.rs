//! Incremental integrity checker for FLAC collections
//!
//! This library keeps a ledger of every FLAC file under a root folder and
//! the last time it passed `flac --test`. Each run re-verifies only the
//! files that are due, chosen by staleness and by a share of the collection.

pub mod check;
pub mod config;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod models;
pub mod policy;
pub mod progress;
pub mod scanner;
pub mod verifier;

pub use check::run_check;
pub use config::{AgeThreshold, CheckConfig, LimitMode, PercentageLimit};
pub use driver::{CheckpointPolicy, DriverOutcome, VerificationDriver};
pub use error::{IntegrityError, IntegrityErrorKind};
pub use ledger::LedgerStore;
pub use models::{CheckResult, EntryStatus, LastCheck, LedgerEntry};
pub use policy::{select, Selection, SelectionPolicy};
pub use progress::ProgressReporter;
pub use scanner::{scan_collection, ScanReport};
pub use verifier::{FlacVerifier, Verdict, Verifier};
