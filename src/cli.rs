use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{LockPolicy, PathOverrides, RetryPolicy};
use crate::models::SmellLevel;

/// Command line interface definition for testsmell-diff.
#[derive(Parser, Debug)]
#[command(name = "testsmell-diff")]
#[command(about = "Attribute test-smell changes to annotated test refactorings")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbosity")]
    pub quiet: bool,

    /// Also append log records to this file
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(flatten)]
    pub paths: PathArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Locations of inputs and outputs. Unset paths follow the research layout under `--base-dir`.
#[derive(Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// Root of the research repository
    #[arg(long, global = true, env = "TESTSMELL_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// TestSmellDetector working directory (holds results/, repos/ and locks/)
    #[arg(long, global = true, env = "TESTSMELL_DETECTOR_DIR")]
    pub detector_dir: Option<PathBuf>,

    /// TestSmellDetector JAR
    #[arg(long, global = true, env = "TESTSMELL_JAR")]
    pub jar: Option<PathBuf>,

    /// Annotation export (JSON)
    #[arg(long, global = true, env = "TESTSMELL_ANNOTATIONS")]
    pub annotations: Option<PathBuf>,

    /// Sampled commits CSV with commit_id and parent_commit_id columns
    #[arg(long, global = true, env = "TESTSMELL_COMMITS")]
    pub commits: Option<PathBuf>,

    /// Directory receiving CSV/JSON results
    #[arg(long, global = true, env = "TESTSMELL_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Java executable used to run the detector
    #[arg(long, global = true, env = "TESTSMELL_JAVA")]
    pub java: Option<String>,
}

impl PathArgs {
    pub fn into_overrides(self) -> PathOverrides {
        PathOverrides {
            base_dir: self.base_dir,
            detector_dir: self.detector_dir,
            jar: self.jar,
            annotations: self.annotations,
            commits: self.commits,
            output_dir: self.output_dir,
            java: self.java,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run TestSmellDetector for every annotated commit and its parent
    Collect(CollectArgs),
    /// Compute range-restricted smell diffs per refactoring
    Diff,
    /// Compute whole-commit smell totals per annotation row
    Totals(TotalsArgs),
    /// Summarize change patterns from the wide diff CSVs
    Summarize(SummarizeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CollectArgs {
    /// Number of parallel workers (1 runs serially)
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Extra attempts per commit after a failed run
    #[arg(long, default_value_t = 2)]
    pub retries: u32,

    /// Initial retry backoff in seconds (doubles per retry)
    #[arg(long, value_name = "SECS", default_value_t = 2)]
    pub backoff: u64,

    /// Upper bound for the retry backoff in seconds
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub max_backoff: u64,

    /// Age in seconds after which a repository lock is considered abandoned
    #[arg(long, value_name = "SECS", default_value_t = 6 * 60 * 60)]
    pub stale_lock: u64,

    /// Fail the command if any commit could not be collected
    #[arg(long)]
    pub strict: bool,
}

impl CollectArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retries,
            initial_backoff: Duration::from_secs(self.backoff),
            max_backoff: Duration::from_secs(self.max_backoff),
        }
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            stale_after: Duration::from_secs(self.stale_lock),
            ..LockPolicy::default()
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct TotalsArgs {
    /// Level to compute (default: both)
    #[arg(short, long, value_enum)]
    pub level: Option<SmellLevel>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SummarizeArgs {
    /// Level to summarize (default: both)
    #[arg(short, long, value_enum)]
    pub level: Option<SmellLevel>,
}

/// Levels selected by an optional `--level` flag.
pub fn selected_levels(level: Option<SmellLevel>) -> Vec<SmellLevel> {
    match level {
        Some(level) => vec![level],
        None => vec![SmellLevel::File, SmellLevel::Method],
    }
}
