//! Whole-commit smell totals, without restricting to annotated ranges.

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::diff::LevelDelta;
use crate::inputs::ParentIndex;
use crate::models::{CommitUrl, Refactoring, SmellCounts, SmellLevel};
use crate::store::ResultStore;

/// Totals of one annotation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitTotals {
    pub commit_url: String,
    pub type_name: String,
    pub delta: LevelDelta,
}

/// Load whole-commit counts at the given level. Missing output counts as empty.
pub fn commit_counts<S: ResultStore + ?Sized>(
    store: &S,
    commit: &CommitUrl,
    level: SmellLevel,
) -> SmellCounts {
    let counts = match level {
        SmellLevel::File => store.file_table(commit).map(|t| t.column_totals()),
        SmellLevel::Method => store.method_report(commit).map(|r| r.method_totals()),
    };
    counts.unwrap_or_else(|e| {
        debug!("No {}-level output for {}: {}", level, commit, e);
        SmellCounts::new()
    })
}

/// One entry per annotation row whose parent is known, in input order.
pub fn collect_totals<S: ResultStore + ?Sized>(
    store: &S,
    parents: &ParentIndex,
    refactorings: &[Refactoring],
    level: SmellLevel,
) -> Vec<CommitTotals> {
    let mut totals = Vec::new();
    for refactoring in refactorings {
        let commit = match CommitUrl::parse(&refactoring.url) {
            Ok(commit) => commit,
            Err(e) => {
                warn!("Skipping {}: {}", refactoring.url, e);
                continue;
            }
        };
        let Some(parent) = parents.parent_url(&commit) else {
            continue;
        };
        totals.push(CommitTotals {
            commit_url: refactoring.url.clone(),
            type_name: refactoring.type_name.clone().unwrap_or_default(),
            delta: LevelDelta::new(
                commit_counts(store, &parent, level),
                commit_counts(store, &commit, level),
            ),
        });
    }
    totals
}

/// Every smell name seen in any row, sorted.
pub fn smell_names(totals: &[CommitTotals]) -> Vec<String> {
    totals
        .iter()
        .flat_map(|t| t.delta.before.keys().chain(t.delta.after.keys()))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Header and rows for the totals CSV. Smells absent from a row read as 0.
pub fn totals_table(totals: &[CommitTotals]) -> (Vec<String>, Vec<Vec<String>>) {
    let smells = smell_names(totals);

    let mut header = vec!["commit_url".to_string(), "type_name".to_string()];
    for smell in &smells {
        header.push(format!("{}_before", smell));
        header.push(format!("{}_after", smell));
        header.push(format!("{}_diff", smell));
    }

    let rows = totals
        .iter()
        .map(|t| {
            let mut row = vec![t.commit_url.clone(), t.type_name.clone()];
            for smell in &smells {
                row.push(t.delta.before_of(smell).to_string());
                row.push(t.delta.after_of(smell).to_string());
                row.push(t.delta.diff_of(smell).to_string());
            }
            row
        })
        .collect();

    (header, rows)
}

/// Output file name for the given level.
pub fn totals_file_name(level: SmellLevel) -> String {
    format!("testsmell_diff_result_{}.csv", level)
}
