//! Selection policy: which entries get verified on this run
//!
//! Entries are ordered oldest-checked first. The staleness threshold yields
//! the number of entries due for re-verification (a binary search over that
//! ordering); the coverage percentage then acts as a floor (MIN) or a
//! ceiling (MAX) on it.

use chrono::{NaiveDateTime, TimeDelta};

use crate::config::{AgeThreshold, CheckConfig, LimitMode, PercentageLimit};
use crate::models::{LastCheck, LedgerEntry};

/// Age and percentage settings for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub age: Option<AgeThreshold>,
    pub percentage: Option<PercentageLimit>,
}

impl SelectionPolicy {
    pub fn new(age: Option<AgeThreshold>, percentage: Option<PercentageLimit>) -> Self {
        Self { age, percentage }
    }

    pub fn from_config(config: &CheckConfig) -> Self {
        Self::new(config.age, config.percentage)
    }

    /// Entries checked at or before this point are due
    pub fn cutoff(&self, now: NaiveDateTime) -> Option<LastCheck> {
        self.age.map(|age| age_cutoff(age, now))
    }
}

/// Ordered working set handed to the verification driver
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Every reconciled entry; the first `limit` are up for verification
    pub entries: Vec<LedgerEntry>,
    /// Number of entries to verify
    pub limit: usize,
    /// Hard stop on verified items (percentage in MAX mode without age)
    pub cap: Option<usize>,
    /// Entries due by staleness
    pub limit_by_age: Option<usize>,
    /// Entries allowed by the coverage percentage
    pub limit_by_percentage: Option<usize>,
    /// Whether `entries` were re-sorted by path
    pub ordered_by_path: bool,
}

impl Selection {
    /// The entries up for verification, in processing order
    pub fn selected(&self) -> &[LedgerEntry] {
        &self.entries[..self.limit.min(self.entries.len())]
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limit == 0
    }
}

/// Oldest-checked first, ties by path
pub fn sort_by_last_check(entries: &mut [LedgerEntry]) {
    entries.sort_by(|a, b| {
        a.date_checked
            .cmp(&b.date_checked)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
}

pub fn sort_by_path(entries: &mut [LedgerEntry]) {
    entries.sort_by(|a, b| a.file_path.cmp(&b.file_path));
}

/// Resolve an age threshold into the newest last-check still considered due
pub fn age_cutoff(age: AgeThreshold, now: NaiveDateTime) -> LastCheck {
    match age {
        AgeThreshold::Minutes(minutes) => i64::try_from(minutes)
            .ok()
            .and_then(TimeDelta::try_minutes)
            .and_then(|delta| now.checked_sub_signed(delta))
            .map_or(LastCheck::Never, LastCheck::At),
        AgeThreshold::IgnoreHistory => LastCheck::Never,
        AgeThreshold::StartOfDay => {
            LastCheck::At(now.date().and_hms_opt(0, 0, 0).unwrap_or(now))
        }
    }
}

/// Number of entries checked at or before `cutoff`.
///
/// `sorted` must be ordered by `date_checked`.
pub fn limit_by_age(sorted: &[LedgerEntry], cutoff: LastCheck) -> usize {
    sorted.partition_point(|entry| entry.date_checked <= cutoff)
}

/// Share of `total` rounded half up, `None` for a zero percentage
pub fn limit_by_percentage(total: usize, percent: u32) -> Option<usize> {
    if percent == 0 {
        return None;
    }
    let share = (total as u64).saturating_mul(percent as u64).saturating_add(50) / 100;
    Some(usize::try_from(share).unwrap_or(usize::MAX).min(total))
}

/// Combine the partial limits into `(limit, cap)`
pub fn effective_limit(
    by_age: Option<usize>,
    by_percentage: Option<(usize, LimitMode)>,
    total: usize,
) -> (usize, Option<usize>) {
    match (by_age, by_percentage) {
        (Some(age), Some((pct, LimitMode::Min))) => (age.max(pct), None),
        (Some(age), Some((pct, LimitMode::Max))) => (age.min(pct), None),
        (Some(age), None) => (age, None),
        (None, Some((pct, LimitMode::Min))) => (pct, None),
        // Without a staleness floor everything is eligible and the driver
        // stops at the ceiling.
        (None, Some((pct, LimitMode::Max))) => (total, Some(pct)),
        (None, None) => (0, None),
    }
}

/// Order `entries` and work out how many of them to verify
pub fn select(
    mut entries: Vec<LedgerEntry>,
    policy: &SelectionPolicy,
    now: NaiveDateTime,
) -> Selection {
    sort_by_last_check(&mut entries);
    let total = entries.len();

    if total == 0 {
        log::warn!("No item, nothing will be done");
        return Selection::default();
    }

    log::info!("Total item(s): {}", total);
    log_bounds(&entries, now);

    let by_age = policy.cutoff(now).map(|cutoff| limit_by_age(&entries, cutoff));
    match by_age {
        Some(limit) => log::info!("Limit item(s) by age: {}", limit),
        None => log::info!("Limit item(s) by age: not defined"),
    }

    let by_percentage = policy
        .percentage
        .and_then(|p| limit_by_percentage(total, p.percent).map(|limit| (limit, p.mode)));
    match by_percentage {
        Some((limit, mode)) => {
            log::info!("Limit item(s) by percentage: {} {}", limit, mode.as_str())
        }
        None => log::info!("Limit item(s) by percentage: not defined"),
    }

    let (limit, cap) = effective_limit(by_age, by_percentage, total);
    if let (Some(age), Some(_)) = (by_age, by_percentage) {
        if age != limit {
            log::info!(
                "Limit item 'by age' changed by limit 'by percentage' from {} to {}",
                age,
                limit
            );
        }
    }
    match cap {
        Some(cap) => log::warn!("Effective item(s) limit: {} (stopping after {})", limit, cap),
        None => log::warn!("Effective item(s) limit: {}", limit),
    }

    let ordered_by_path = limit >= total && cap.map_or(true, |cap| cap >= total);
    if ordered_by_path {
        sort_by_path(&mut entries);
    }

    Selection {
        entries,
        limit,
        cap,
        limit_by_age: by_age,
        limit_by_percentage: by_percentage.map(|(limit, _)| limit),
        ordered_by_path,
    }
}

fn log_bounds(sorted: &[LedgerEntry], now: NaiveDateTime) {
    let (Some(oldest), Some(newest)) = (sorted.first(), sorted.last()) else {
        return;
    };
    for (label, entry) in [("Oldest", oldest), ("Newest", newest)] {
        let minutes = (now - entry.date_checked.as_datetime()).num_minutes();
        log::info!(
            "{} checked item: {} / {} minutes",
            label,
            entry.date_checked,
            minutes
        );
    }
}
