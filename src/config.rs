//! Pipeline paths and collection tuning.
//!
//! Paths can be configured via:
//! - CLI arguments: `--base-dir`, `--detector-dir`, `--jar`, ...
//! - Environment variables: `TESTSMELL_BASE_DIR`, `TESTSMELL_DETECTOR_DIR`, ...
//!
//! CLI arguments take precedence over environment variables. Anything left
//! unset is derived from the base directory using the research repository
//! layout.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DETECTOR_DIR: &str = "5_analyze_test_refactoring/TestSmellDetector";
const JAR_FILE: &str = "jar/TestSmellDetector-0.1-jar-with-dependencies.jar";
const ANNOTATIONS_FILE: &str =
    "5_analyze_test_refactoring/src/results/annotation_result_2024-02-20.json";
const COMMITS_FILE: &str =
    "2_sampling_test_refactor_commits/result/sampling_test_commits_all.csv";
const OUTPUT_DIR: &str = "5_analyze_test_refactoring/src/smells_result";

/// Explicit path overrides; `None` falls back to the layout under the base dir.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathOverrides {
    pub base_dir: Option<PathBuf>,
    pub detector_dir: Option<PathBuf>,
    pub jar: Option<PathBuf>,
    pub annotations: Option<PathBuf>,
    pub commits: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub java: Option<String>,
}

impl PathOverrides {
    /// Read overrides from `TESTSMELL_*` environment variables.
    pub fn from_env() -> Self {
        let path = |name: &str| {
            env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            base_dir: path("TESTSMELL_BASE_DIR"),
            detector_dir: path("TESTSMELL_DETECTOR_DIR"),
            jar: path("TESTSMELL_JAR"),
            annotations: path("TESTSMELL_ANNOTATIONS"),
            commits: path("TESTSMELL_COMMITS"),
            output_dir: path("TESTSMELL_OUTPUT_DIR"),
            java: env::var("TESTSMELL_JAVA").ok().filter(|v| !v.is_empty()),
        }
    }

    /// Merge with higher-priority overrides. Values set in `other` win.
    pub fn with_overrides(self, other: PathOverrides) -> Self {
        Self {
            base_dir: other.base_dir.or(self.base_dir),
            detector_dir: other.detector_dir.or(self.detector_dir),
            jar: other.jar.or(self.jar),
            annotations: other.annotations.or(self.annotations),
            commits: other.commits.or(self.commits),
            output_dir: other.output_dir.or(self.output_dir),
            java: other.java.or(self.java),
        }
    }
}

/// Resolved locations of every pipeline input and output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub base_dir: PathBuf,
    pub detector_dir: PathBuf,
    pub jar: PathBuf,
    pub annotations: PathBuf,
    pub commits: PathBuf,
    pub output_dir: PathBuf,
    pub java: String,
}

impl PipelineConfig {
    /// Derive every path from the base directory.
    pub fn with_base_dir(base_dir: impl AsRef<Path>) -> Self {
        Self::resolve(PathOverrides {
            base_dir: Some(base_dir.as_ref().to_path_buf()),
            ..PathOverrides::default()
        })
    }

    /// Resolve overrides against the default layout.
    pub fn resolve(overrides: PathOverrides) -> Self {
        let base_dir = overrides
            .base_dir
            .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let detector_dir = overrides
            .detector_dir
            .unwrap_or_else(|| base_dir.join(DETECTOR_DIR));
        let jar = overrides
            .jar
            .unwrap_or_else(|| detector_dir.join(JAR_FILE));
        let annotations = overrides
            .annotations
            .unwrap_or_else(|| base_dir.join(ANNOTATIONS_FILE));
        let commits = overrides
            .commits
            .unwrap_or_else(|| base_dir.join(COMMITS_FILE));
        let output_dir = overrides
            .output_dir
            .unwrap_or_else(|| base_dir.join(OUTPUT_DIR));

        Self {
            base_dir,
            detector_dir,
            jar,
            annotations,
            commits,
            output_dir,
            java: overrides.java.unwrap_or_else(|| "java".to_string()),
        }
    }
}

/// Retry schedule for detector runs. Backoff doubles after every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// No retries, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Repository lock tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// A lock file older than this is considered abandoned and removed.
    pub stale_after: Duration,
    /// How often a waiting worker re-checks the lock.
    pub poll_interval: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(6 * 60 * 60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_from_base_dir() {
        let config = PipelineConfig::with_base_dir("/research");
        assert_eq!(
            config.detector_dir,
            PathBuf::from("/research/5_analyze_test_refactoring/TestSmellDetector")
        );
        assert_eq!(
            config.jar,
            PathBuf::from(
                "/research/5_analyze_test_refactoring/TestSmellDetector/jar/TestSmellDetector-0.1-jar-with-dependencies.jar"
            )
        );
        assert_eq!(
            config.commits,
            PathBuf::from(
                "/research/2_sampling_test_refactor_commits/result/sampling_test_commits_all.csv"
            )
        );
        assert_eq!(config.java, "java");
    }

    #[test]
    fn test_detector_dir_override_moves_jar() {
        let config = PipelineConfig::resolve(PathOverrides {
            base_dir: Some(PathBuf::from("/research")),
            detector_dir: Some(PathBuf::from("/opt/detector")),
            ..PathOverrides::default()
        });
        assert_eq!(
            config.jar,
            PathBuf::from("/opt/detector/jar/TestSmellDetector-0.1-jar-with-dependencies.jar")
        );
        assert_eq!(
            config.output_dir,
            PathBuf::from("/research/5_analyze_test_refactoring/src/smells_result")
        );
    }

    #[test]
    fn test_overrides_take_precedence() {
        let env_like = PathOverrides {
            base_dir: Some(PathBuf::from("/from-env")),
            java: Some("/usr/bin/java".to_string()),
            ..PathOverrides::default()
        };
        let cli = PathOverrides {
            base_dir: Some(PathBuf::from("/from-cli")),
            ..PathOverrides::default()
        };
        let merged = env_like.with_overrides(cli);
        assert_eq!(merged.base_dir, Some(PathBuf::from("/from-cli")));
        assert_eq!(merged.java, Some("/usr/bin/java".to_string()));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(RetryPolicy::none().backoff(3), Duration::ZERO);
    }
}
