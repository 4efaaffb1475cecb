//! Configuration for a check run

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::IntegrityError;

/// Default minutes between two automatic ledger saves
pub const DEFAULT_CHECKPOINT_MINUTES: u64 = 3;

/// Default share of the selection (percent) verified between two saves
pub const DEFAULT_CHECKPOINT_PERCENT: u32 = 10;

/// Minimum number of items between two item-count based saves
pub const DEFAULT_CHECKPOINT_FLOOR: usize = 100;

/// CLI value for "only files that were never checked"
pub const AGE_IGNORE_HISTORY: i64 = -1;

/// CLI value for "everything not checked since midnight"
pub const AGE_START_OF_DAY: i64 = -2;

/// Staleness threshold for picking files to re-verify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeThreshold {
    /// Files last checked more than this many minutes ago
    Minutes(u64),
    /// Only files without any verification history
    IgnoreHistory,
    /// Files not checked since the start of the current day
    StartOfDay,
}

impl AgeThreshold {
    /// Map the CLI integer encoding onto a threshold
    pub fn from_minutes(value: i64) -> Option<Self> {
        match value {
            v if v >= 0 => Some(AgeThreshold::Minutes(v as u64)),
            AGE_IGNORE_HISTORY => Some(AgeThreshold::IgnoreHistory),
            AGE_START_OF_DAY => Some(AgeThreshold::StartOfDay),
            _ => None,
        }
    }

    /// Parse the `--age` option. Invalid values disable the filter.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let Ok(value) = raw.trim().parse::<i64>() else {
            log::warn!("Option 'age' must be an integer, got {:?}", raw);
            log::warn!("No value will be used for this option");
            return None;
        };
        let threshold = Self::from_minutes(value);
        if threshold.is_none() {
            log::warn!(
                "Option 'age' must be >= 0, {} or {}, got {}",
                AGE_IGNORE_HISTORY,
                AGE_START_OF_DAY,
                value
            );
            log::warn!("No value will be used for this option");
        }
        threshold
    }
}

/// Whether the coverage percentage is a floor or a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LimitMode {
    /// Verify at least this share of the collection
    Min,
    /// Verify at most this share of the collection
    Max,
}

impl LimitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitMode::Min => "MIN",
            LimitMode::Max => "MAX",
        }
    }

    fn option_name(&self) -> &'static str {
        match self {
            LimitMode::Min => "min-percentage",
            LimitMode::Max => "max-percentage",
        }
    }
}

/// Coverage percentage paired with its mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercentageLimit {
    pub percent: u32,
    pub mode: LimitMode,
}

impl PercentageLimit {
    pub fn new(percent: u32, mode: LimitMode) -> Self {
        Self { percent, mode }
    }

    /// Build the limit from the two mutually exclusive CLI options.
    ///
    /// Giving both is a usage error. A malformed value only disables the
    /// filter.
    pub fn from_options(
        min: Option<&str>,
        max: Option<&str>,
    ) -> Result<Option<Self>, IntegrityError> {
        match (min, max) {
            (Some(_), Some(_)) => Err(IntegrityError::usage(
                "options 'min-percentage' and 'max-percentage' are mutually exclusive",
            )),
            (Some(raw), None) => Ok(Self::parse_lenient(raw, LimitMode::Min)),
            (None, Some(raw)) => Ok(Self::parse_lenient(raw, LimitMode::Max)),
            (None, None) => Ok(None),
        }
    }

    fn parse_lenient(raw: &str, mode: LimitMode) -> Option<Self> {
        match raw.trim().parse::<u32>() {
            Ok(percent) => Some(Self::new(percent, mode)),
            Err(_) => {
                log::warn!(
                    "Option '{}' must be a non-negative integer, got {:?}",
                    mode.option_name(),
                    raw
                );
                log::warn!("No value will be used for this option");
                None
            }
        }
    }
}

/// Configuration for a check run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Path to the `flac` executable
    pub flac_path: PathBuf,

    /// Path to the `metaflac` executable, used to report stream MD5s
    pub metaflac_path: Option<PathBuf>,

    /// Root folder of the collection
    pub root: PathBuf,

    /// Ledger (report) file
    pub ledger_path: PathBuf,

    /// Staleness threshold
    pub age: Option<AgeThreshold>,

    /// Coverage percentage
    pub percentage: Option<PercentageLimit>,

    /// File extensions to include (lowercase, without dot)
    pub extensions: HashSet<String>,

    /// Directory names pruned from the walk
    pub ignore_dirs: HashSet<String>,

    /// Save the ledger when this many minutes passed since the last save
    pub checkpoint_minutes: u64,

    /// Save the ledger every this share (percent) of the selection
    pub checkpoint_percent: u32,

    /// Lower bound for the item-count save interval
    pub checkpoint_floor: usize,

    /// Modtime difference (seconds) still treated as the same file
    pub modtime_tolerance: f64,

    /// Emit JSON progress messages on stderr
    pub show_progress: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            flac_path: PathBuf::from("flac"),
            metaflac_path: None,
            root: PathBuf::from("."),
            ledger_path: PathBuf::from("flac_integrity.csv"),
            age: None,
            percentage: None,
            extensions: Self::default_extensions(),
            ignore_dirs: HashSet::new(),
            checkpoint_minutes: DEFAULT_CHECKPOINT_MINUTES,
            checkpoint_percent: DEFAULT_CHECKPOINT_PERCENT,
            checkpoint_floor: DEFAULT_CHECKPOINT_FLOOR,
            modtime_tolerance: 0.0,
            show_progress: false,
        }
    }
}

impl CheckConfig {
    /// Create a config builder
    pub fn builder() -> CheckConfigBuilder {
        CheckConfigBuilder::new()
    }

    /// Get the default audio extensions
    pub fn default_extensions() -> HashSet<String> {
        ["flac"].iter().map(|s| s.to_string()).collect()
    }

    /// Check if an extension should be included
    pub fn should_include_extension(&self, ext: &str) -> bool {
        self.extensions.contains(&ext.to_lowercase())
    }

    /// Check if a directory should be pruned
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        self.ignore_dirs.contains(name)
    }

    /// Number of verified items between two item-count based saves
    pub fn checkpoint_every(&self, limit: usize) -> usize {
        let share = limit.saturating_mul(self.checkpoint_percent as usize) / 100;
        share.max(self.checkpoint_floor).max(1)
    }
}

/// Builder for CheckConfig
#[derive(Debug, Default)]
pub struct CheckConfigBuilder {
    config: CheckConfig,
}

impl CheckConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flac_path(mut self, path: PathBuf) -> Self {
        self.config.flac_path = path;
        self
    }

    pub fn metaflac_path(mut self, path: Option<PathBuf>) -> Self {
        self.config.metaflac_path = path;
        self
    }

    pub fn root(mut self, root: PathBuf) -> Self {
        self.config.root = root;
        self
    }

    pub fn ledger_path(mut self, path: PathBuf) -> Self {
        self.config.ledger_path = path;
        self
    }

    pub fn age(mut self, age: Option<AgeThreshold>) -> Self {
        self.config.age = age;
        self
    }

    pub fn percentage(mut self, percentage: Option<PercentageLimit>) -> Self {
        self.config.percentage = percentage;
        self
    }

    /// Set the extensions whitelist
    pub fn extensions(mut self, extensions: HashSet<String>) -> Self {
        self.config.extensions = extensions;
        self
    }

    /// Add a directory to ignore
    pub fn add_ignore_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.ignore_dirs.insert(dir.into());
        self
    }

    pub fn checkpoint_minutes(mut self, minutes: u64) -> Self {
        self.config.checkpoint_minutes = minutes;
        self
    }

    pub fn checkpoint_percent(mut self, percent: u32) -> Self {
        self.config.checkpoint_percent = percent;
        self
    }

    pub fn checkpoint_floor(mut self, floor: usize) -> Self {
        self.config.checkpoint_floor = floor;
        self
    }

    pub fn modtime_tolerance(mut self, seconds: f64) -> Self {
        self.config.modtime_tolerance = seconds.max(0.0);
        self
    }

    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.config.show_progress = enabled;
        self
    }

    /// Build the config
    pub fn build(self) -> CheckConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CheckConfig::default();
        assert!(config.age.is_none());
        assert!(config.percentage.is_none());
        assert_eq!(config.checkpoint_minutes, DEFAULT_CHECKPOINT_MINUTES);
        assert_eq!(config.modtime_tolerance, 0.0);
    }

    #[test]
    fn test_should_include_extension() {
        let config = CheckConfig::default();
        assert!(config.should_include_extension("flac"));
        assert!(config.should_include_extension("FLAC"));
        assert!(config.should_include_extension("Flac"));
        assert!(!config.should_include_extension("mp3"));
    }

    #[test]
    fn test_age_from_minutes() {
        assert_eq!(AgeThreshold::from_minutes(0), Some(AgeThreshold::Minutes(0)));
        assert_eq!(AgeThreshold::from_minutes(1440), Some(AgeThreshold::Minutes(1440)));
        assert_eq!(AgeThreshold::from_minutes(-1), Some(AgeThreshold::IgnoreHistory));
        assert_eq!(AgeThreshold::from_minutes(-2), Some(AgeThreshold::StartOfDay));
        assert_eq!(AgeThreshold::from_minutes(-3), None);
    }

    #[test]
    fn test_age_parse_lenient() {
        assert_eq!(AgeThreshold::parse_lenient(" 60 "), Some(AgeThreshold::Minutes(60)));
        assert_eq!(AgeThreshold::parse_lenient("sixty"), None);
        assert_eq!(AgeThreshold::parse_lenient("1.5"), None);
    }

    #[test]
    fn test_percentage_options() {
        assert_eq!(
            PercentageLimit::from_options(Some("20"), None).unwrap(),
            Some(PercentageLimit::new(20, LimitMode::Min))
        );
        assert_eq!(
            PercentageLimit::from_options(None, Some("5")).unwrap(),
            Some(PercentageLimit::new(5, LimitMode::Max))
        );
        assert_eq!(PercentageLimit::from_options(None, None).unwrap(), None);
        // Malformed values disable the filter instead of failing
        assert_eq!(PercentageLimit::from_options(Some("abc"), None).unwrap(), None);
        assert_eq!(PercentageLimit::from_options(None, Some("-4")).unwrap(), None);
    }

    #[test]
    fn test_percentage_options_conflict() {
        let err = PercentageLimit::from_options(Some("10"), Some("20")).unwrap_err();
        assert_eq!(err.kind, crate::error::IntegrityErrorKind::Usage);
    }

    #[test]
    fn test_checkpoint_every() {
        let config = CheckConfig::builder()
            .checkpoint_percent(10)
            .checkpoint_floor(100)
            .build();
        assert_eq!(config.checkpoint_every(50), 100);
        assert_eq!(config.checkpoint_every(5000), 500);

        let config = CheckConfig::builder().checkpoint_percent(0).checkpoint_floor(0).build();
        assert_eq!(config.checkpoint_every(10), 1);
    }

    #[test]
    fn test_config_builder() {
        let config = CheckConfig::builder()
            .root(PathBuf::from("/music"))
            .ledger_path(PathBuf::from("/var/lib/ledger.csv"))
            .age(Some(AgeThreshold::Minutes(10)))
            .percentage(Some(PercentageLimit::new(25, LimitMode::Max)))
            .add_ignore_dir("@eaDir")
            .modtime_tolerance(-5.0)
            .build();

        assert_eq!(config.root, PathBuf::from("/music"));
        assert_eq!(config.age, Some(AgeThreshold::Minutes(10)));
        assert!(config.should_ignore_dir("@eaDir"));
        assert!(!config.should_ignore_dir("Albums"));
        assert_eq!(config.modtime_tolerance, 0.0);
    }

    #[test]
    fn test_config_serializes() {
        let config = CheckConfig::builder()
            .percentage(Some(PercentageLimit::new(25, LimitMode::Max)))
            .build();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["percentage"]["mode"], "MAX");
        assert_eq!(json["percentage"]["percent"], 25);
    }
}
