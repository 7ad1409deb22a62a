use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::Path;

use log::debug;

use crate::models::{CommitUrl, Refactoring};

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid annotation JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid commit CSV in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("Column '{column}' missing from {path}")]
    MissingColumn { path: String, column: String },
}

/// Load the annotation export (a JSON array of refactoring records).
pub fn load_annotations(path: &Path) -> Result<Vec<Refactoring>, InputError> {
    let json = fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let refactorings: Vec<Refactoring> =
        serde_json::from_str(&json).map_err(|source| InputError::Json {
            path: path.display().to_string(),
            source,
        })?;
    debug!(
        "Loaded {} refactorings from {}",
        refactorings.len(),
        path.display()
    );
    Ok(refactorings)
}

/// Group refactorings by commit URL. Keys are sorted, group members keep input order.
pub fn group_by_commit(refactorings: &[Refactoring]) -> BTreeMap<&str, Vec<&Refactoring>> {
    let mut groups: BTreeMap<&str, Vec<&Refactoring>> = BTreeMap::new();
    for refactoring in refactorings {
        groups
            .entry(refactoring.url.as_str())
            .or_default()
            .push(refactoring);
    }
    groups
}

/// Maps a sampled commit id to its parent commit id.
#[derive(Debug, Clone, Default)]
pub struct ParentIndex {
    parents: HashMap<String, String>,
}

impl ParentIndex {
    pub fn load(path: &Path) -> Result<Self, InputError> {
        let file = fs::File::open(path).map_err(|source| InputError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(file, &path.display().to_string())
    }

    /// Parse a CSV with `commit_id` and `parent_commit_id` columns.
    pub fn from_reader<R: Read>(reader: R, origin: &str) -> Result<Self, InputError> {
        let csv_err = |source| InputError::Csv {
            path: origin.to_string(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = reader.headers().map_err(csv_err)?.clone();

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}') == name)
                .ok_or_else(|| InputError::MissingColumn {
                    path: origin.to_string(),
                    column: name.to_string(),
                })
        };
        let commit_col = column("commit_id")?;
        let parent_col = column("parent_commit_id")?;

        let mut parents = HashMap::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            let Some(commit) = record.get(commit_col).filter(|c| !c.is_empty()) else {
                continue;
            };
            let parent = record.get(parent_col).unwrap_or_default();
            // First row wins even when its parent cell is empty.
            parents
                .entry(commit.to_string())
                .or_insert_with(|| parent.to_string());
        }
        Ok(Self { parents })
    }

    pub fn from_pairs<I, C, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, P)>,
        C: Into<String>,
        P: Into<String>,
    {
        let mut parents = HashMap::new();
        for (commit, parent) in pairs {
            parents.entry(commit.into()).or_insert_with(|| parent.into());
        }
        Self { parents }
    }

    /// Parent of `sha`; `None` when unknown or recorded without a parent.
    pub fn parent_of(&self, sha: &str) -> Option<&str> {
        self.parents
            .get(sha)
            .map(String::as_str)
            .filter(|parent| !parent.is_empty())
    }

    /// URL of the parent commit in the same repository, if known.
    pub fn parent_url(&self, commit: &CommitUrl) -> Option<CommitUrl> {
        self.parent_of(commit.sha())
            .map(|parent| commit.with_sha(parent))
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}
