//! Verification driver - runs the verifier over a selection and persists results

use chrono::{Local, NaiveDateTime};
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::config::CheckConfig;
use crate::error::IntegrityError;
use crate::ledger::LedgerStore;
use crate::models::LedgerEntry;
use crate::policy::{sort_by_last_check, Selection};
use crate::progress::ProgressReporter;
use crate::verifier::{Verdict, Verifier};

/// When to save the ledger in the middle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    /// Save once this much time has passed since the last save
    pub interval: Duration,
    /// Save every this many verified items
    pub every_items: usize,
}

impl CheckpointPolicy {
    pub fn new(interval: Duration, every_items: usize) -> Self {
        Self {
            interval,
            every_items: every_items.max(1),
        }
    }

    /// Checkpoint settings for a selection of `limit` items
    pub fn from_config(config: &CheckConfig, limit: usize) -> Self {
        Self::new(
            Duration::from_secs(config.checkpoint_minutes.saturating_mul(60)),
            config.checkpoint_every(limit),
        )
    }

    fn is_due(&self, since_last_save: Duration, consumed: usize) -> bool {
        since_last_save > self.interval || consumed % self.every_items == 0
    }
}

/// Counters of a completed verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverOutcome {
    /// Items that passed verification
    pub verified: u64,
    /// Selected items whose file disappeared
    pub vanished: u64,
    /// Intermediate saves
    pub checkpoints: u64,
    /// Entries written by the final save
    pub persisted: usize,
}

/// Wall-clock source for check timestamps
pub type Clock = fn() -> NaiveDateTime;

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Runs the verifier over the selected entries, one file at a time.
///
/// The first failed file aborts the run. Whatever was verified before it is
/// still written to the ledger.
pub struct VerificationDriver<'a> {
    verifier: &'a dyn Verifier,
    store: &'a LedgerStore,
    reporter: &'a ProgressReporter,
    checkpoint: CheckpointPolicy,
    clock: Clock,
}

impl<'a> VerificationDriver<'a> {
    pub fn new(
        verifier: &'a dyn Verifier,
        store: &'a LedgerStore,
        reporter: &'a ProgressReporter,
        checkpoint: CheckpointPolicy,
    ) -> Self {
        Self {
            verifier,
            store,
            reporter,
            checkpoint,
            clock: local_now,
        }
    }

    /// Replace the wall clock used to stamp successful checks
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn run(&self, selection: Selection) -> Result<DriverOutcome, IntegrityError> {
        let Selection {
            mut entries,
            limit,
            cap,
            ..
        } = selection;

        let mut outcome = DriverOutcome::default();
        let mut vanished: HashSet<String> = HashSet::new();
        let mut consumed = 0usize;
        let mut last_save = Instant::now();
        let width = limit.to_string().len();

        for idx in 0..entries.len() {
            if consumed >= limit {
                log::info!("There are no more items satisfying 'age' or 'percentage' conditions");
                break;
            }
            if let Some(cap) = cap {
                if outcome.verified as usize >= cap {
                    log::info!("Maximum of {} verified item(s) reached", cap);
                    break;
                }
            }

            let file_path = entries[idx].file_path.clone();
            let exists = entries[idx].path().try_exists();
            match exists {
                Ok(true) => {}
                Ok(false) => {
                    log::warn!("File vanished since the scan, skipping: {}", file_path);
                    vanished.insert(file_path);
                    continue;
                }
                Err(e) => {
                    let err = IntegrityError::from(e).with_path(file_path);
                    return Err(self.abort(&mut entries, &vanished, err));
                }
            }

            consumed += 1;
            log::info!(
                "Verifying ({:>w$}/{:>w$} - {:6.2}%): {}",
                consumed,
                limit,
                consumed as f64 / limit as f64 * 100.0,
                file_path,
                w = width
            );
            self.reporter.report_progress(consumed, limit, &file_path);

            let failure = match self.verifier.verify(entries[idx].path()) {
                Ok(Verdict::Passed { .. }) => {
                    entries[idx].mark_checked((self.clock)());
                    outcome.verified += 1;
                    None
                }
                Ok(Verdict::Failed { reason }) => {
                    log::error!("KO: {}", file_path);
                    Some(IntegrityError::verification_failed(file_path.into(), reason))
                }
                Err(e) => Some(e.with_path(file_path)),
            };

            if let Some(err) = failure {
                return Err(self.abort(&mut entries, &vanished, err));
            }

            if self.checkpoint.is_due(last_save.elapsed(), consumed) {
                self.store.save(&entries)?;
                outcome.checkpoints += 1;
                last_save = Instant::now();
                log::debug!("Checkpoint after {} item(s)", consumed);
            }
        }

        outcome.vanished = vanished.len() as u64;
        outcome.persisted = self.finish(&mut entries, &vanished)?;
        Ok(outcome)
    }

    /// Persist what was verified so far and hand back the error that stopped the run
    fn abort(
        &self,
        entries: &mut Vec<LedgerEntry>,
        vanished: &HashSet<String>,
        err: IntegrityError,
    ) -> IntegrityError {
        if let Err(save_err) = self.finish(entries, vanished) {
            log::error!("Failed to save ledger after aborted run: {}", save_err);
        }
        err
    }

    /// Final save: drop vanished files, oldest-checked first
    fn finish(
        &self,
        entries: &mut Vec<LedgerEntry>,
        vanished: &HashSet<String>,
    ) -> Result<usize, IntegrityError> {
        entries.retain(|entry| !vanished.contains(&entry.file_path));
        sort_by_last_check(entries);
        self.store.save(entries)?;
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntegrityErrorKind;
    use crate::models::LastCheck;
    use std::cell::RefCell;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn fixed_now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-06-15 18:30:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn earlier() -> LastCheck {
        LastCheck::At(
            NaiveDateTime::parse_from_str("2024-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
        )
    }

    /// Passes every file except those whose name contains "bad"
    #[derive(Default)]
    struct ScriptedVerifier {
        calls: RefCell<Vec<PathBuf>>,
    }

    impl Verifier for ScriptedVerifier {
        fn verify(&self, path: &Path) -> Result<Verdict, IntegrityError> {
            self.calls.borrow_mut().push(path.to_path_buf());
            let name = path.file_name().unwrap().to_string_lossy();
            if name.contains("bad") {
                Ok(Verdict::Failed {
                    reason: "ERROR while decoding data".to_string(),
                })
            } else {
                Ok(Verdict::Passed { md5: None })
            }
        }
    }

    struct Fixture {
        dir: TempDir,
        store: LedgerStore,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = LedgerStore::new(dir.path().join("ledger.csv"));
            Self { dir, store }
        }

        fn file(&self, name: &str) -> LedgerEntry {
            let path = self.dir.path().join(name);
            fs::write(&path, name).unwrap();
            LedgerEntry::new(path.to_string_lossy().into_owned(), name.len() as u64, 1.0)
        }

        fn selection(&self, entries: Vec<LedgerEntry>, limit: usize) -> Selection {
            Selection {
                entries,
                limit,
                ..Selection::default()
            }
        }
    }

    fn no_checkpoints() -> CheckpointPolicy {
        CheckpointPolicy::new(Duration::from_secs(3600), usize::MAX)
    }

    fn run(
        fixture: &Fixture,
        verifier: &ScriptedVerifier,
        selection: Selection,
        checkpoint: CheckpointPolicy,
    ) -> Result<DriverOutcome, IntegrityError> {
        let reporter = ProgressReporter::disabled();
        VerificationDriver::new(verifier, &fixture.store, &reporter, checkpoint)
            .with_clock(fixed_now)
            .run(selection)
    }

    #[test]
    fn test_checkpoint_policy_is_due() {
        let policy = CheckpointPolicy::new(Duration::from_secs(180), 10);
        assert!(!policy.is_due(Duration::from_secs(10), 3));
        assert!(policy.is_due(Duration::from_secs(10), 10));
        assert!(policy.is_due(Duration::from_secs(181), 3));
        assert_eq!(CheckpointPolicy::new(Duration::ZERO, 0).every_items, 1);
    }

    #[test]
    fn test_verifies_up_to_limit() {
        let fixture = Fixture::new();
        let verifier = ScriptedVerifier::default();
        let entries = vec![fixture.file("a.flac"), fixture.file("b.flac"), fixture.file("c.flac")];

        let outcome = run(&fixture, &verifier, fixture.selection(entries, 2), no_checkpoints()).unwrap();

        assert_eq!(outcome.verified, 2);
        assert_eq!(verifier.calls.borrow().len(), 2);
        let saved = fixture.store.load().unwrap();
        assert_eq!(saved.len(), 3);
        // The unchecked entry moves to the front for the next run
        assert!(saved[0].file_path.ends_with("c.flac"));
        assert!(saved[0].date_checked.is_never());
        assert_eq!(saved[1].date_checked, LastCheck::At(fixed_now()));
        assert_eq!(saved[2].date_checked, LastCheck::At(fixed_now()));
    }

    #[test]
    fn test_zero_limit_still_persists() {
        let fixture = Fixture::new();
        let verifier = ScriptedVerifier::default();
        let entries = vec![fixture.file("a.flac")];

        let outcome = run(&fixture, &verifier, fixture.selection(entries, 0), no_checkpoints()).unwrap();

        assert_eq!(outcome.verified, 0);
        assert_eq!(outcome.persisted, 1);
        assert!(verifier.calls.borrow().is_empty());
        assert_eq!(fixture.store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_failure_aborts_and_keeps_previous_date() {
        let fixture = Fixture::new();
        let verifier = ScriptedVerifier::default();
        let entries = vec![
            fixture.file("a.flac"),
            fixture.file("bad.flac").with_date_checked(earlier()),
            fixture.file("c.flac"),
        ];

        let err = run(&fixture, &verifier, fixture.selection(entries, 3), no_checkpoints()).unwrap_err();

        assert_eq!(err.kind, IntegrityErrorKind::VerificationFailed);
        assert!(err.path.unwrap().ends_with("bad.flac"));
        // c.flac was never attempted
        assert_eq!(verifier.calls.borrow().len(), 2);

        let saved = fixture.store.load().unwrap();
        let bad = saved.iter().find(|e| e.file_path.ends_with("bad.flac")).unwrap();
        assert_eq!(bad.date_checked, earlier());
        let a = saved.iter().find(|e| e.file_path.ends_with("a.flac")).unwrap();
        assert_eq!(a.date_checked, LastCheck::At(fixed_now()));
        let c = saved.iter().find(|e| e.file_path.ends_with("c.flac")).unwrap();
        assert!(c.date_checked.is_never());
    }

    #[test]
    fn test_vanished_files_do_not_consume_budget() {
        let fixture = Fixture::new();
        let verifier = ScriptedVerifier::default();
        let ghost = LedgerEntry::new(
            fixture.dir.path().join("ghost.flac").to_string_lossy().into_owned(),
            1,
            1.0,
        );
        let entries = vec![ghost, fixture.file("a.flac"), fixture.file("b.flac")];

        let outcome = run(&fixture, &verifier, fixture.selection(entries, 2), no_checkpoints()).unwrap();

        assert_eq!(outcome.verified, 2);
        assert_eq!(outcome.vanished, 1);
        let saved = fixture.store.load().unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|e| !e.file_path.ends_with("ghost.flac")));
    }

    #[test]
    fn test_cap_stops_early() {
        let fixture = Fixture::new();
        let verifier = ScriptedVerifier::default();
        let entries: Vec<_> = (0..5).map(|i| fixture.file(&format!("{}.flac", i))).collect();
        let selection = Selection {
            cap: Some(2),
            ..fixture.selection(entries, 5)
        };

        let outcome = run(&fixture, &verifier, selection, no_checkpoints()).unwrap();
        assert_eq!(outcome.verified, 2);
        assert_eq!(verifier.calls.borrow().len(), 2);
    }

    #[test]
    fn test_item_checkpoints() {
        let fixture = Fixture::new();
        let verifier = ScriptedVerifier::default();
        let entries: Vec<_> = (0..6).map(|i| fixture.file(&format!("{}.flac", i))).collect();
        let checkpoint = CheckpointPolicy::new(Duration::from_secs(3600), 2);

        let outcome = run(&fixture, &verifier, fixture.selection(entries, 6), checkpoint).unwrap();
        assert_eq!(outcome.checkpoints, 3);
        assert_eq!(outcome.verified, 6);
    }

    #[test]
    fn test_elapsed_interval_checkpoints_every_item() {
        let fixture = Fixture::new();
        let verifier = ScriptedVerifier::default();
        let entries: Vec<_> = (0..4).map(|i| fixture.file(&format!("{}.flac", i))).collect();
        let checkpoint = CheckpointPolicy::new(Duration::ZERO, usize::MAX);

        let outcome = run(&fixture, &verifier, fixture.selection(entries, 4), checkpoint).unwrap();
        assert_eq!(outcome.checkpoints, 4);
        assert_eq!(outcome.verified, 4);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_not_treated_as_vanished() {
        use std::os::unix::fs::PermissionsExt;

        let fixture = Fixture::new();
        let locked = fixture.dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        let hidden_path = locked.join("hidden.flac");
        fs::write(&hidden_path, b"audio").unwrap();
        let hidden = LedgerEntry::new(hidden_path.to_string_lossy().into_owned(), 5, 1.0)
            .with_date_checked(earlier());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        if fs::metadata(&hidden_path).is_ok() {
            // Running with privileges that ignore permissions
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let verifier = ScriptedVerifier::default();
        let entries = vec![hidden, fixture.file("a.flac")];
        let result = run(&fixture, &verifier, fixture.selection(entries, 2), no_checkpoints());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let err = result.unwrap_err();
        assert_eq!(err.kind, IntegrityErrorKind::PermissionDenied);
        assert!(verifier.calls.borrow().is_empty());
        let saved = fixture.store.load().unwrap();
        let kept = saved.iter().find(|e| e.file_path.ends_with("hidden.flac")).unwrap();
        assert_eq!(kept.date_checked, earlier());
    }
}
