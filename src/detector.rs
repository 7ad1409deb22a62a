use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::models::CommitUrl;

/// Errors from detector runs
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Failed to execute {program}: {source}")]
    ExecutionFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Detector exited with {status} for {commit}: {stderr}")]
    CommandFailed {
        commit: String,
        status: String,
        stderr: String,
    },
    #[error("Detector finished but produced no output for {0}")]
    OutputMissing(String),
    #[error("TestSmellDetector JAR not found: {0}")]
    JarNotFound(String),
}

/// Captured output of a successful detector run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorRun {
    pub stdout: String,
    pub stderr: String,
}

/// Trait for running the smell detector - allows mocking in tests
pub trait Detector: Send + Sync {
    /// Analyse one commit, writing its results into the detector's cache.
    fn run(&self, commit: &CommitUrl) -> Result<DetectorRun, DetectorError>;

    /// Check the detector can run at all, before any commit is attempted.
    fn check(&self) -> Result<(), DetectorError> {
        Ok(())
    }
}

/// Runs `java -jar <jar> <commit url>` from the detector directory.
#[derive(Debug, Clone)]
pub struct JarDetector {
    java: String,
    jar: PathBuf,
    work_dir: PathBuf,
}

impl JarDetector {
    pub fn new(java: impl Into<String>, jar: impl AsRef<Path>, work_dir: impl AsRef<Path>) -> Self {
        Self {
            java: java.into(),
            jar: jar.as_ref().to_path_buf(),
            work_dir: work_dir.as_ref().to_path_buf(),
        }
    }

    fn command(&self, commit: &CommitUrl) -> Command {
        let mut cmd = Command::new(&self.java);
        cmd.arg("-jar")
            .arg(&self.jar)
            .arg(commit.to_string())
            .current_dir(&self.work_dir);
        cmd
    }
}

impl Detector for JarDetector {
    fn check(&self) -> Result<(), DetectorError> {
        if self.jar.is_file() {
            Ok(())
        } else {
            Err(DetectorError::JarNotFound(self.jar.display().to_string()))
        }
    }

    fn run(&self, commit: &CommitUrl) -> Result<DetectorRun, DetectorError> {
        debug!(
            "Running {} -jar {} {}",
            self.java,
            self.jar.display(),
            commit
        );
        let output = self
            .command(commit)
            .output()
            .map_err(|source| DetectorError::ExecutionFailed {
                program: self.java.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(DetectorError::CommandFailed {
                commit: commit.to_string(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(DetectorRun { stdout, stderr })
    }
}
