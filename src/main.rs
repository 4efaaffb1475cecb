//! FLAC Integrity Check CLI
//!
//! Incrementally re-verifies a FLAC collection with `flac --test`.

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use flac_integrity::error::{EXIT_CODE_ERR_OPTION, EXIT_CODE_OK};
use flac_integrity::{
    run_check, AgeThreshold, CheckConfig, CheckResult, FlacVerifier, IntegrityError,
    PercentageLimit, ProgressReporter,
};

const ABOUT: &str = r#"
FLAC Integrity Check - incremental verification of a FLAC collection

Examples:
  flac_integrity check --flac /usr/bin/flac --folder /music --report ledger.csv --age 43200
      re-verify every file not checked during the last 30 days
  flac_integrity check --flac flac --folder /music --report ledger.csv --age 43200 --min-percentage 2
      same, but always verify at least 2% of the collection
  flac_integrity check --flac flac --folder /music --report ledger.csv --max-percentage 5
      verify the 5% least recently checked files

Special --age values: -1 only never-checked files, -2 files not checked today.
"#;

/// Progress messages are rate limited to one per interval
const PROGRESS_INTERVAL_MS: u64 = 200;

/// FLAC integrity checker
#[derive(Parser)]
#[command(name = "flac_integrity")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the files of a collection that are due
    Check {
        /// Path to the flac executable
        #[arg(long = "flac")]
        flac: PathBuf,

        /// Root folder of the FLAC collection (searched recursively)
        #[arg(long)]
        folder: PathBuf,

        /// Path to the report (ledger) file
        #[arg(long)]
        report: PathBuf,

        /// Age in minutes identifying files to check (-1: never checked, -2: not checked today)
        #[arg(long, allow_hyphen_values = true)]
        age: Option<String>,

        /// Minimum percentage of the collection to check
        #[arg(long = "min-percentage", allow_hyphen_values = true)]
        min_percentage: Option<String>,

        /// Maximum percentage of the collection to check
        #[arg(long = "max-percentage", allow_hyphen_values = true)]
        max_percentage: Option<String>,

        /// Path to the metaflac executable, to log stream MD5s
        #[arg(long)]
        metaflac: Option<PathBuf>,

        /// Directory name to skip while scanning (repeatable)
        #[arg(long = "ignore-dir")]
        ignore_dirs: Vec<String>,

        /// Minutes between automatic ledger saves
        #[arg(long, default_value_t = flac_integrity::config::DEFAULT_CHECKPOINT_MINUTES)]
        checkpoint_minutes: u64,

        /// Modification time difference (seconds) still treated as the same file
        #[arg(long, default_value_t = 0.0)]
        modtime_tolerance: f64,

        /// Write JSON progress messages to stderr
        #[arg(long)]
        progress: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::from(EXIT_CODE_OK),
                _ => ExitCode::from(EXIT_CODE_ERR_OPTION),
            };
        }
    };

    match cli.command {
        Some(Commands::Check {
            flac,
            folder,
            report,
            age,
            min_percentage,
            max_percentage,
            metaflac,
            ignore_dirs,
            checkpoint_minutes,
            modtime_tolerance,
            progress,
            json,
        }) => {
            let percentage = match PercentageLimit::from_options(
                min_percentage.as_deref(),
                max_percentage.as_deref(),
            ) {
                Ok(percentage) => percentage,
                Err(e) => {
                    error!("{}", e.message);
                    return ExitCode::from(e.exit_code());
                }
            };
            let age = age.as_deref().and_then(AgeThreshold::parse_lenient);

            info!("Folder: {:?}", folder);
            info!("Report: {:?}", report);
            info!("Age: {:?}", age);
            info!("Percentage: {:?}", percentage);

            let mut builder = CheckConfig::builder()
                .flac_path(flac)
                .metaflac_path(metaflac)
                .root(folder)
                .ledger_path(report)
                .age(age)
                .percentage(percentage)
                .checkpoint_minutes(checkpoint_minutes)
                .modtime_tolerance(modtime_tolerance)
                .show_progress(progress);
            for dir in ignore_dirs {
                builder = builder.add_ignore_dir(dir);
            }
            let config = builder.build();

            let verifier = FlacVerifier::from_config(&config);
            let reporter = ProgressReporter::new(config.show_progress, PROGRESS_INTERVAL_MS);

            match run_check(&config, &verifier, &reporter) {
                Ok(result) => {
                    print_result(&result, json);
                    ExitCode::from(EXIT_CODE_OK)
                }
                Err(e) => {
                    report_failure(&e);
                    ExitCode::from(e.exit_code())
                }
            }
        }
        None => {
            println!("{}", ABOUT);
            println!("Use 'flac_integrity check --help' for the check options");
            ExitCode::from(EXIT_CODE_OK)
        }
    }
}

fn report_failure(e: &IntegrityError) {
    match e.kind {
        flac_integrity::IntegrityErrorKind::VerificationFailed => {
            error!("KO - verification failed for {:?}: {}", e.path, e.message)
        }
        _ => error!("{}", e),
    }
}

fn print_result(result: &CheckResult, json: bool) {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Cannot serialize result: {}", e),
        }
        return;
    }

    println!("Check completed:");
    println!("  Total files: {}", result.total_entries);
    println!("  Directories: {}", result.total_dirs);
    println!("  New files: {}", result.new_entries);
    println!("  Modified files: {}", result.modified_entries);
    println!("  Removed files: {}", result.removed_entries);
    println!("  Selected: {}", result.effective_limit);
    println!("  Verified: {}", result.verified);
    println!("  Vanished: {}", result.vanished);
    println!("  Checkpoints: {}", result.checkpoints);
    println!("  Duration: {}ms", result.duration_ms);
}
