//! Range-restricted test-smell diff.
//!
//! For every annotated refactoring the code elements on the `before` side are
//! matched against the parent commit's detector output and the `after` side
//! against the commit's own output. File level sums the per-file counts of
//! every touched test file; method level counts method smells whose line span
//! overlaps an annotated range.

use std::collections::{BTreeSet, HashSet};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::inputs::{group_by_commit, ParentIndex};
use crate::models::{
    side_locations, CommitUrl, ParameterSide, Refactoring, SmellCounts, UrlError, SMELL_COLUMNS,
};
use crate::store::{CommitSmells, FileSmellTable, MethodSmellReport, ResultStore};

/// Reasons a commit group is skipped.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error("Parent commit not found for {0}")]
    NoParent(String),
    #[error("Invalid parameter_data in '{type_name}' annotation of {url}: {source}")]
    InvalidParameters {
        url: String,
        type_name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// File-level counts for one side of an annotation.
///
/// Each distinct file name is counted once; every table row whose path ends
/// with it contributes all smell columns. A smell key is present only when at
/// least one row matched.
pub fn file_smell_counts(side: &ParameterSide, table: &FileSmellTable) -> SmellCounts {
    let mut counts = SmellCounts::new();
    let mut processed: HashSet<&str> = HashSet::new();

    for location in side_locations(side) {
        let file_name = location.file_name();
        if !processed.insert(file_name) {
            continue;
        }
        for row in table.rows_ending_with(file_name) {
            for column in SMELL_COLUMNS {
                *counts.entry(column.to_string()).or_insert(0) += row.count(column);
            }
        }
    }
    counts
}

/// Method-level counts for one side of an annotation.
///
/// Elements without a line range are ignored. Elements are not deduplicated,
/// so a smell overlapping two annotated ranges is counted twice.
pub fn range_smell_counts(side: &ParameterSide, report: &MethodSmellReport) -> SmellCounts {
    let mut counts = SmellCounts::new();

    for location in side_locations(side) {
        let Some(range) = location.range else {
            continue;
        };
        let file_name = location.file_name();
        for smell in report.method_smells_in(file_name) {
            let (Some(begin), Some(end)) = (smell.begin_line, smell.end_line) else {
                continue;
            };
            if !range.overlaps(begin, end) {
                continue;
            }
            if let Some(name) = &smell.smell_name {
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

/// `after - before` over the union of keys; a missing side counts as 0.
pub fn diff_counts(before: &SmellCounts, after: &SmellCounts) -> SmellCounts {
    before
        .keys()
        .chain(after.keys())
        .map(|smell| {
            let b = before.get(smell).copied().unwrap_or(0);
            let a = after.get(smell).copied().unwrap_or(0);
            (smell.clone(), a - b)
        })
        .collect()
}

/// Before/after/diff for one smell, as written to the JSON report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmellChange {
    pub smell_name: String,
    pub before: i64,
    pub after: i64,
    pub diff: i64,
}

/// Before and after counts at one granularity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelDelta {
    pub before: SmellCounts,
    pub after: SmellCounts,
}

impl LevelDelta {
    pub fn new(before: SmellCounts, after: SmellCounts) -> Self {
        Self { before, after }
    }

    pub fn before_of(&self, smell: &str) -> i64 {
        self.before.get(smell).copied().unwrap_or(0)
    }

    pub fn after_of(&self, smell: &str) -> i64 {
        self.after.get(smell).copied().unwrap_or(0)
    }

    pub fn diff_of(&self, smell: &str) -> i64 {
        self.after_of(smell) - self.before_of(smell)
    }

    /// Changes for every smell seen on either side, sorted by name.
    pub fn changes(&self) -> Vec<SmellChange> {
        let smells: BTreeSet<&String> = self.before.keys().chain(self.after.keys()).collect();
        smells
            .into_iter()
            .map(|smell| SmellChange {
                smell_name: smell.clone(),
                before: self.before_of(smell),
                after: self.after_of(smell),
                diff: self.diff_of(smell),
            })
            .collect()
    }

    /// `[before, after, diff]` per smell in `SMELL_COLUMNS` order.
    pub fn wide_values(&self) -> Vec<i64> {
        SMELL_COLUMNS
            .iter()
            .flat_map(|smell| [self.before_of(smell), self.after_of(smell), self.diff_of(smell)])
            .collect()
    }
}

/// Smell changes attributed to one annotated refactoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefactoringDiff {
    pub commit_url: String,
    pub type_name: String,
    pub file_level: LevelDelta,
    pub method_level: LevelDelta,
}

/// JSON form of a [`RefactoringDiff`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefactoringReport {
    pub commit_url: String,
    pub type_name: String,
    pub file_level_smells: Vec<SmellChange>,
    pub method_level_smells: Vec<SmellChange>,
}

impl RefactoringDiff {
    /// Compare the parent's smells (before) with the commit's (after).
    pub fn compute(
        refactoring: &Refactoring,
        parent: &CommitSmells,
        commit: &CommitSmells,
    ) -> Result<Self, DiffError> {
        let params = refactoring
            .parameters()
            .map_err(|source| DiffError::InvalidParameters {
                url: refactoring.url.clone(),
                type_name: refactoring.type_name().to_string(),
                source,
            })?;
        let file_level = LevelDelta::new(
            file_smell_counts(&params.before, &parent.files),
            file_smell_counts(&params.after, &commit.files),
        );
        let method_level = LevelDelta::new(
            range_smell_counts(&params.before, &parent.methods),
            range_smell_counts(&params.after, &commit.methods),
        );
        Ok(Self {
            commit_url: refactoring.url.clone(),
            type_name: refactoring.type_name().to_string(),
            file_level,
            method_level,
        })
    }

    pub fn report(&self) -> RefactoringReport {
        RefactoringReport {
            commit_url: self.commit_url.clone(),
            type_name: self.type_name.clone(),
            file_level_smells: self.file_level.changes(),
            method_level_smells: self.method_level.changes(),
        }
    }
}

/// Header of the wide CSVs: identity columns, then three columns per smell.
pub fn wide_header() -> Vec<String> {
    let mut header = vec!["commit_url".to_string(), "type_name".to_string()];
    for smell in SMELL_COLUMNS {
        header.push(format!("{}_before", smell));
        header.push(format!("{}_after", smell));
        header.push(format!("{}_diff", smell));
    }
    header
}

/// One wide CSV row for the given level.
pub fn wide_row(commit_url: &str, type_name: &str, level: &LevelDelta) -> Vec<String> {
    let mut row = vec![commit_url.to_string(), type_name.to_string()];
    row.extend(level.wide_values().into_iter().map(|v| v.to_string()));
    row
}

/// Outcome of a full diff run.
#[derive(Debug, Clone, Default)]
pub struct DiffRun {
    pub diffs: Vec<RefactoringDiff>,
    pub skipped_commits: Vec<String>,
}

impl DiffRun {
    pub fn file_rows(&self) -> Vec<Vec<String>> {
        self.diffs
            .iter()
            .map(|d| wide_row(&d.commit_url, &d.type_name, &d.file_level))
            .collect()
    }

    pub fn method_rows(&self) -> Vec<Vec<String>> {
        self.diffs
            .iter()
            .map(|d| wide_row(&d.commit_url, &d.type_name, &d.method_level))
            .collect()
    }

    pub fn reports(&self) -> Vec<RefactoringReport> {
        self.diffs.iter().map(RefactoringDiff::report).collect()
    }
}

/// Computes diffs for every annotated refactoring.
pub struct DiffCalculator<'a, S: ResultStore + ?Sized> {
    store: &'a S,
    parents: &'a ParentIndex,
}

impl<'a, S: ResultStore + ?Sized> DiffCalculator<'a, S> {
    pub fn new(store: &'a S, parents: &'a ParentIndex) -> Self {
        Self { store, parents }
    }

    /// Process commit groups in URL order. A group that fails is logged and
    /// skipped as a whole; the run itself never fails.
    pub fn run(&self, refactorings: &[Refactoring]) -> DiffRun {
        let mut run = DiffRun::default();

        for (url, group) in group_by_commit(refactorings) {
            info!("Processing refactoring data for {}", url);
            match self.process_commit(url, &group) {
                Ok(diffs) => run.diffs.extend(diffs),
                Err(e) => {
                    match &e {
                        DiffError::NoParent(_) => warn!("{}", e),
                        _ => error!("Error processing {}: {}", url, e),
                    }
                    run.skipped_commits.push(url.to_string());
                }
            }
        }
        run
    }

    fn process_commit(
        &self,
        url: &str,
        group: &[&Refactoring],
    ) -> Result<Vec<RefactoringDiff>, DiffError> {
        let commit = CommitUrl::parse(url)?;
        let parent = self
            .parents
            .parent_url(&commit)
            .ok_or_else(|| DiffError::NoParent(url.to_string()))?;

        let commit_smells = CommitSmells::load(self.store, &commit);
        let parent_smells = CommitSmells::load(self.store, &parent);

        group
            .iter()
            .map(|refactoring| RefactoringDiff::compute(refactoring, &parent_smells, &commit_smells))
            .collect()
    }
}
