use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::thread;

use log::{debug, error, info, warn};
use rayon::prelude::*;

use crate::cancel;
use crate::config::{LockPolicy, RetryPolicy};
use crate::detector::{Detector, DetectorError};
use crate::inputs::ParentIndex;
use crate::lock::{LockError, RepoLock};
use crate::models::{CommitUrl, Refactoring};
use crate::store::{FsResultStore, ResultStore};

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// What happened to a single commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Output was already cached.
    Skipped,
    /// Detector ran and produced output after `attempts` tries.
    Collected { attempts: u32 },
    /// Every attempt failed; the last error is kept. Zero attempts means
    /// the detector never ran (lock or detector setup failure).
    Failed { attempts: u32, reason: String },
    /// Ctrl+C arrived before the detector was started.
    Cancelled,
}

/// Outcome for an annotated commit and its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    NoParent,
    InvalidUrl(String),
    /// Nothing was started for this commit.
    Processed {
        commit: CollectOutcome,
        parent: CollectOutcome,
    },
    Cancelled,
}

/// Tally of a collection run. `cancelled` counts commits not started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub collected: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_parent: usize,
    pub invalid: usize,
    pub cancelled: usize,
    pub failures: Vec<String>,
}

impl CollectReport {
    fn record_one(&mut self, url: &str, outcome: &CollectOutcome) {
        match outcome {
            CollectOutcome::Skipped => self.skipped += 1,
            CollectOutcome::Collected { .. } => self.collected += 1,
            CollectOutcome::Failed { reason, .. } => {
                self.failed += 1;
                self.failures.push(format!("{}: {}", url, reason));
            }
            CollectOutcome::Cancelled => self.cancelled += 1,
        }
    }

    fn record(&mut self, url: &str, outcome: &CommitOutcome) {
        match outcome {
            CommitOutcome::NoParent => self.no_parent += 1,
            CommitOutcome::InvalidUrl(_) => self.invalid += 1,
            CommitOutcome::Cancelled => self.cancelled += 1,
            CommitOutcome::Processed { commit, parent } => {
                self.record_one(url, commit);
                self.record_one(&format!("{} (parent)", url), parent);
            }
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Unique commit URLs of the annotations, sorted.
pub fn unique_commit_urls(refactorings: &[Refactoring]) -> Vec<&str> {
    refactorings
        .iter()
        .map(|r| r.url.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Remove a git `index.lock` left in the detector's clone. Returns true if removed.
pub fn remove_stale_index_lock(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            warn!("Removed stale index.lock: {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            error!("Failed to remove index.lock: {} ({})", path.display(), e);
            false
        }
    }
}

/// Runs the detector for every annotated commit and its parent, idempotently.
pub struct Collector<'a, D: Detector> {
    detector: &'a D,
    store: &'a FsResultStore,
    parents: &'a ParentIndex,
    retry: RetryPolicy,
    lock: LockPolicy,
    available: OnceLock<Result<(), String>>,
}

impl<'a, D: Detector> Collector<'a, D> {
    pub fn new(detector: &'a D, store: &'a FsResultStore, parents: &'a ParentIndex) -> Self {
        Self {
            detector,
            store,
            parents,
            retry: RetryPolicy::default(),
            lock: LockPolicy::default(),
            available: OnceLock::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lock_policy(mut self, lock: LockPolicy) -> Self {
        self.lock = lock;
        self
    }

    /// Collect one commit and then its parent.
    pub fn collect_commit(&self, url: &str) -> CommitOutcome {
        if cancel::is_cancelled() {
            return CommitOutcome::Cancelled;
        }
        let commit = match CommitUrl::parse(url) {
            Ok(commit) => commit,
            Err(e) => {
                warn!("Skipping {}: {}", url, e);
                return CommitOutcome::InvalidUrl(e.to_string());
            }
        };
        let Some(parent) = self.parents.parent_url(&commit) else {
            warn!("Parent commit not found for {}", url);
            return CommitOutcome::NoParent;
        };

        let commit_outcome = self.collect_one(&commit);
        if commit_outcome == CollectOutcome::Cancelled {
            return CommitOutcome::Cancelled;
        }
        let parent_outcome = self.collect_one(&parent);
        CommitOutcome::Processed {
            commit: commit_outcome,
            parent: parent_outcome,
        }
    }

    /// Run the detector for a single commit unless its output is cached.
    pub fn collect_one(&self, commit: &CommitUrl) -> CollectOutcome {
        if self.store.has_results(commit) {
            info!("Skip {} because output already exists.", commit);
            return CollectOutcome::Skipped;
        }
        if cancel::is_cancelled() {
            return CollectOutcome::Cancelled;
        }
        if let Err(reason) = self.detector_available() {
            return CollectOutcome::Failed {
                attempts: 0,
                reason,
            };
        }

        let _guard = match RepoLock::acquire(&self.store.lock_dir(), &commit.repo_key(), &self.lock)
        {
            Ok(guard) => guard,
            Err(LockError::Cancelled(_)) => return CollectOutcome::Cancelled,
            Err(e) => {
                error!("Error in process_commit for {}: {}", commit, e);
                return CollectOutcome::Failed {
                    attempts: 0,
                    reason: e.to_string(),
                };
            }
        };

        // Another worker may have finished this commit while we waited.
        if self.store.has_results(commit) {
            info!("Skip {} because output already exists.", commit);
            return CollectOutcome::Skipped;
        }

        let index_lock = self.store.index_lock_path(commit);
        let mut last_error = String::new();

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let backoff = self.retry.backoff(attempt);
                warn!(
                    "Retry {}/{} for {} after {:?}",
                    attempt, self.retry.max_retries, commit, backoff
                );
                thread::sleep(backoff);
            }
            remove_stale_index_lock(&index_lock);

            info!("Running TestSmellDetector for {}", commit);
            match self.run_once(commit) {
                Ok(()) => {
                    info!("Test smell detection successful for {}", commit);
                    return CollectOutcome::Collected {
                        attempts: attempt + 1,
                    };
                }
                Err(e) => {
                    error!("Test smell detection failed for {}: {}", commit, e);
                    last_error = e.to_string();
                }
            }
        }

        CollectOutcome::Failed {
            attempts: self.retry.max_retries + 1,
            reason: last_error,
        }
    }

    /// Detector setup check, run once before the first real detector run.
    fn detector_available(&self) -> Result<(), String> {
        self.available
            .get_or_init(|| {
                self.detector.check().map_err(|e| {
                    error!("TestSmellDetector unavailable: {}", e);
                    e.to_string()
                })
            })
            .clone()
    }

    fn run_once(&self, commit: &CommitUrl) -> Result<(), DetectorError> {
        let run = self.detector.run(commit)?;
        if !run.stdout.trim().is_empty() {
            debug!("Detector output for {}:\n{}", commit, run.stdout.trim_end());
        }
        if !run.stderr.trim().is_empty() {
            debug!("Detector stderr for {}:\n{}", commit, run.stderr.trim_end());
        }
        if !self.store.has_results(commit) {
            return Err(DetectorError::OutputMissing(commit.to_string()));
        }
        Ok(())
    }

    /// Collect every unique commit of the annotations, one at a time.
    pub fn run_serial(&self, refactorings: &[Refactoring]) -> CollectReport {
        let urls = unique_commit_urls(refactorings);
        info!("Running in SERIAL mode over {} commits.", urls.len());

        let mut report = CollectReport::default();
        for (i, url) in urls.iter().enumerate() {
            debug!("[{}/{}] {}", i + 1, urls.len(), url);
            let outcome = self.collect_commit(url);
            report.record(url, &outcome);
        }
        report
    }

    /// Collect every unique commit on a pool of `jobs` workers.
    ///
    /// Commits of the same repository serialize on the repository lock.
    pub fn run_parallel(
        &self,
        refactorings: &[Refactoring],
        jobs: usize,
    ) -> Result<CollectReport, CollectError> {
        let urls = unique_commit_urls(refactorings);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .build()?;
        info!(
            "Running in PARALLEL mode with {} workers over {} commits.",
            pool.current_num_threads(),
            urls.len()
        );

        let done = AtomicUsize::new(0);
        let outcomes: Vec<(&str, CommitOutcome)> = pool.install(|| {
            urls.par_iter()
                .map(|url| {
                    let outcome = self.collect_commit(url);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!("[{}/{}] {}", n, urls.len(), url);
                    (*url, outcome)
                })
                .collect()
        });

        let mut report = CollectReport::default();
        for (url, outcome) in outcomes {
            report.record(url, &outcome);
        }
        Ok(report)
    }
}
