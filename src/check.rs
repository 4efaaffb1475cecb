//! A complete check run: load ledger, scan, select, verify, persist

use chrono::Local;
use std::time::Instant;

use crate::config::CheckConfig;
use crate::driver::{CheckpointPolicy, VerificationDriver};
use crate::error::IntegrityError;
use crate::ledger::LedgerStore;
use crate::models::CheckResult;
use crate::policy::{select, SelectionPolicy};
use crate::progress::ProgressReporter;
use crate::scanner::scan_collection;
use crate::verifier::Verifier;

/// Run one incremental check of the collection described by `config`.
///
/// Fatal errors are also sent to `reporter` before being returned.
pub fn run_check(
    config: &CheckConfig,
    verifier: &dyn Verifier,
    reporter: &ProgressReporter,
) -> Result<CheckResult, IntegrityError> {
    match run_check_inner(config, verifier, reporter) {
        Ok(result) => {
            reporter.report_done(&result);
            Ok(result)
        }
        Err(e) => {
            reporter.report_error(&e);
            Err(e)
        }
    }
}

fn run_check_inner(
    config: &CheckConfig,
    verifier: &dyn Verifier,
    reporter: &ProgressReporter,
) -> Result<CheckResult, IntegrityError> {
    let start = Instant::now();
    log::info!("BEG - Check");

    let store = LedgerStore::new(config.ledger_path.clone());
    let previous = store.load()?;
    let mut scan = scan_collection(config, previous)?;

    let mut result = CheckResult {
        total_entries: scan.total_files(),
        total_dirs: scan.total_dirs,
        new_entries: scan.new_files,
        modified_entries: scan.modified_files,
        unchanged_entries: scan.unchanged_files,
        removed_entries: scan.removed_paths.len() as u64,
        ..CheckResult::default()
    };

    let policy = SelectionPolicy::from_config(config);
    let selection = select(
        std::mem::take(&mut scan.entries),
        &policy,
        Local::now().naive_local(),
    );
    result.limit_by_age = selection.limit_by_age;
    result.limit_by_percentage = selection.limit_by_percentage;
    result.effective_limit = selection.limit;

    reporter.report_start(config, selection.total(), selection.limit, selection.cap);

    let checkpoint = CheckpointPolicy::from_config(config, selection.limit);
    let outcome = VerificationDriver::new(verifier, &store, reporter, checkpoint).run(selection)?;

    result.verified = outcome.verified;
    result.vanished = outcome.vanished;
    result.checkpoints = outcome.checkpoints;
    result.duration_ms = start.elapsed().as_millis() as u64;

    log::info!(
        "Elapsed time: {:.3}s for {} item(s)",
        start.elapsed().as_secs_f64(),
        result.verified
    );
    log::info!("END - Check");
    Ok(result)
}
