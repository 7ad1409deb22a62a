//! Detector result cache.
//!
//! TestSmellDetector writes its output for a commit to
//! `<detector dir>/results/smells/<owner>/<repo>/<sha>/`:
//! - `smells_number.csv`: one row per test file with a count per smell
//! - `smells_result.json`: per test file, the individual smell records
//!
//! Everything downstream of `collect` reads through [`ResultStore`].

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use log::error;
use serde::{Deserialize, Serialize};

use crate::models::{CommitUrl, SmellCounts, METHOD_PARENT_TYPE};

pub const FILE_TABLE_NAME: &str = "smells_number.csv";
pub const METHOD_REPORT_NAME: &str = "smells_result.json";
const TEST_FILE_PATH_COLUMN: &str = "TestFilePath";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One row of `smells_number.csv`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSmellRow {
    pub test_file_path: String,
    values: HashMap<String, String>,
}

impl FileSmellRow {
    pub fn new(test_file_path: impl Into<String>) -> Self {
        Self {
            test_file_path: test_file_path.into(),
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(column.into(), value.to_string());
        self
    }

    /// Numeric value of a column. Missing, empty, or non-numeric cells are 0.
    pub fn count(&self, column: &str) -> i64 {
        self.values
            .get(column)
            .and_then(|v| parse_count(v))
            .unwrap_or(0)
    }
}

fn parse_count(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    cell.parse::<i64>()
        .ok()
        .or_else(|| cell.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

/// Per-test-file smell counts for one commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSmellTable {
    columns: Vec<String>,
    rows: Vec<FileSmellRow>,
}

impl FileSmellTable {
    pub fn new(columns: Vec<String>, rows: Vec<FileSmellRow>) -> Self {
        Self { columns, rows }
    }

    pub fn from_reader<R: Read>(reader: R, origin: &str) -> Result<Self, StoreError> {
        let csv_err = |source| StoreError::Csv {
            path: origin.to_string(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let columns: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            let mut row = FileSmellRow::default();
            for (column, value) in columns.iter().zip(record.iter()) {
                if column == TEST_FILE_PATH_COLUMN {
                    row.test_file_path = value.to_string();
                }
                row.values.insert(column.clone(), value.to_string());
            }
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }

    pub fn rows(&self) -> &[FileSmellRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows whose test file path ends with `file_name`.
    pub fn rows_ending_with<'a>(
        &'a self,
        file_name: &'a str,
    ) -> impl Iterator<Item = &'a FileSmellRow> + 'a {
        self.rows
            .iter()
            .filter(move |row| row.test_file_path.ends_with(file_name))
    }

    /// Columns whose every non-empty cell is numeric. Empty tables have none.
    pub fn numeric_columns(&self) -> Vec<&str> {
        if self.rows.is_empty() {
            return Vec::new();
        }
        self.columns
            .iter()
            .filter(|column| {
                self.rows.iter().all(|row| match row.values.get(column.as_str()) {
                    Some(v) if !v.trim().is_empty() => parse_count(v).is_some(),
                    _ => true,
                })
            })
            .map(String::as_str)
            .collect()
    }

    /// Sum of every numeric column across all rows.
    pub fn column_totals(&self) -> SmellCounts {
        self.numeric_columns()
            .into_iter()
            .map(|column| {
                let total = self.rows.iter().map(|row| row.count(column)).sum();
                (column.to_string(), total)
            })
            .collect()
    }
}

/// A single smell occurrence reported for a test file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmellRecord {
    #[serde(default)]
    pub smell_name: Option<String>,
    #[serde(default)]
    pub smell_parent_type: Option<String>,
    #[serde(default)]
    pub begin_line: Option<i64>,
    #[serde(default)]
    pub end_line: Option<i64>,
}

impl SmellRecord {
    pub fn is_method_smell(&self) -> bool {
        self.smell_parent_type.as_deref() == Some(METHOD_PARENT_TYPE)
    }
}

/// Smell records for one test file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFileSmells {
    pub test_file_path: String,
    #[serde(default)]
    pub smells: Vec<SmellRecord>,
}

/// Parsed `smells_result.json` for one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodSmellReport {
    pub entries: Vec<TestFileSmells>,
}

impl MethodSmellReport {
    pub fn new(entries: Vec<TestFileSmells>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Method smells of test files whose path ends with `file_name`.
    pub fn method_smells_in<'a>(
        &'a self,
        file_name: &'a str,
    ) -> impl Iterator<Item = &'a SmellRecord> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.test_file_path.ends_with(file_name))
            .flat_map(|entry| entry.smells.iter())
            .filter(|smell| smell.is_method_smell())
    }

    /// Count of method smells by name across the whole commit.
    pub fn method_totals(&self) -> SmellCounts {
        let mut totals = BTreeMap::new();
        for smell in self
            .entries
            .iter()
            .flat_map(|entry| entry.smells.iter())
            .filter(|smell| smell.is_method_smell())
        {
            if let Some(name) = &smell.smell_name {
                *totals.entry(name.clone()).or_insert(0) += 1;
            }
        }
        totals
    }
}

/// Trait abstracting where detector output is read from.
pub trait ResultStore: Send + Sync {
    /// True when both output files for the commit are present.
    fn has_results(&self, commit: &CommitUrl) -> bool;
    fn file_table(&self, commit: &CommitUrl) -> Result<FileSmellTable, StoreError>;
    fn method_report(&self, commit: &CommitUrl) -> Result<MethodSmellReport, StoreError>;
}

/// Detector output of one commit, loaded once and shared by all its refactorings.
#[derive(Debug, Clone, Default)]
pub struct CommitSmells {
    pub files: FileSmellTable,
    pub methods: MethodSmellReport,
}

impl CommitSmells {
    /// Load both outputs. A missing or broken file is logged and read as empty.
    pub fn load<S: ResultStore + ?Sized>(store: &S, commit: &CommitUrl) -> Self {
        let files = store.file_table(commit).unwrap_or_else(|e| {
            error!("Failed to load file smells for {}: {}", commit, e);
            FileSmellTable::default()
        });
        let methods = store.method_report(commit).unwrap_or_else(|e| {
            error!("Failed to load method smells for {}: {}", commit, e);
            MethodSmellReport::default()
        });
        Self { files, methods }
    }
}

/// Filesystem-backed store rooted at the detector directory.
#[derive(Debug, Clone)]
pub struct FsResultStore {
    detector_dir: PathBuf,
}

impl FsResultStore {
    pub fn new(detector_dir: impl Into<PathBuf>) -> Self {
        Self {
            detector_dir: detector_dir.into(),
        }
    }

    pub fn results_dir(&self, commit: &CommitUrl) -> PathBuf {
        self.detector_dir
            .join("results")
            .join("smells")
            .join(commit.cache_key())
    }

    pub fn file_table_path(&self, commit: &CommitUrl) -> PathBuf {
        self.results_dir(commit).join(FILE_TABLE_NAME)
    }

    pub fn method_report_path(&self, commit: &CommitUrl) -> PathBuf {
        self.results_dir(commit).join(METHOD_REPORT_NAME)
    }

    /// Clone of the commit's repository used by the detector.
    pub fn repo_dir(&self, commit: &CommitUrl) -> PathBuf {
        self.detector_dir.join("repos").join(commit.repo_key())
    }

    /// Git index lock left behind when a detector run dies mid-checkout.
    pub fn index_lock_path(&self, commit: &CommitUrl) -> PathBuf {
        self.repo_dir(commit).join(".git").join("index.lock")
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.detector_dir.join("locks")
    }
}

impl ResultStore for FsResultStore {
    fn has_results(&self, commit: &CommitUrl) -> bool {
        self.file_table_path(commit).is_file() && self.method_report_path(commit).is_file()
    }

    fn file_table(&self, commit: &CommitUrl) -> Result<FileSmellTable, StoreError> {
        let path = self.file_table_path(commit);
        let file = fs::File::open(&path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        FileSmellTable::from_reader(file, &path.display().to_string())
    }

    fn method_report(&self, commit: &CommitUrl) -> Result<MethodSmellReport, StoreError> {
        let path = self.method_report_path(commit);
        let json = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| StoreError::Json {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::write_commit_results;

    const TABLE: &str = "App,TestFilePath,Assertion Roulette,Eager Test,NumberOfMethods\n\
                         app,src/test/FooTest.java,3,1,4\n\
                         app,src/test/BarTest.java,,2,1\n";

    #[test]
    fn test_parse_file_table() {
        let table = FileSmellTable::from_reader(TABLE.as_bytes(), "test").unwrap();
        assert_eq!(table.rows().len(), 2);
        let foo: Vec<_> = table.rows_ending_with("FooTest.java").collect();
        assert_eq!(foo.len(), 1);
        assert_eq!(foo[0].count("Assertion Roulette"), 3);
        assert_eq!(foo[0].count("Mystery Guest"), 0);
    }

    #[test]
    fn test_empty_cell_counts_as_zero() {
        let table = FileSmellTable::from_reader(TABLE.as_bytes(), "test").unwrap();
        let bar: Vec<_> = table.rows_ending_with("BarTest.java").collect();
        assert_eq!(bar[0].count("Assertion Roulette"), 0);
        assert_eq!(bar[0].count("Eager Test"), 2);
    }

    #[test]
    fn test_column_totals_skip_text_columns() {
        let table = FileSmellTable::from_reader(TABLE.as_bytes(), "test").unwrap();
        let totals = table.column_totals();
        assert_eq!(totals.get("Assertion Roulette"), Some(&3));
        assert_eq!(totals.get("Eager Test"), Some(&3));
        assert_eq!(totals.get("NumberOfMethods"), Some(&5));
        assert!(!totals.contains_key("App"));
        assert!(!totals.contains_key("TestFilePath"));
    }

    #[test]
    fn test_method_report_filters_method_smells() {
        let json = r#"[
            {"testFilePath": "src/test/FooTest.java", "smells": [
                {"smellName": "Eager Test", "smellParentType": "Method", "beginLine": 10, "endLine": 20},
                {"smellName": "General Fixture", "smellParentType": "Class", "beginLine": 1, "endLine": 50}
            ]},
            {"testFilePath": "src/test/BarTest.java", "smells": [
                {"smellName": "Eager Test", "smellParentType": "Method", "beginLine": 5, "endLine": 8}
            ]}
        ]"#;
        let report: MethodSmellReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.method_smells_in("FooTest.java").count(), 1);
        let totals = report.method_totals();
        assert_eq!(totals.get("Eager Test"), Some(&2));
        assert!(!totals.contains_key("General Fixture"));
    }

    #[test]
    fn test_fs_store_layout_and_presence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsResultStore::new(dir.path());
        let commit = CommitUrl::parse("https://github.com/owner/repo/commit/abc").unwrap();

        assert_eq!(
            store.results_dir(&commit),
            dir.path().join("results/smells/owner/repo/abc")
        );
        assert_eq!(
            store.index_lock_path(&commit),
            dir.path().join("repos/owner/repo/.git/index.lock")
        );
        assert!(!store.has_results(&commit));

        write_commit_results(&store, &commit, TABLE, "[]");
        assert!(store.has_results(&commit));
        assert_eq!(store.file_table(&commit).unwrap().rows().len(), 2);
        assert!(store.method_report(&commit).unwrap().is_empty());
    }

    #[test]
    fn test_only_one_output_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsResultStore::new(dir.path());
        let commit = CommitUrl::parse("https://github.com/owner/repo/commit/abc").unwrap();
        fs::create_dir_all(store.results_dir(&commit)).unwrap();
        fs::write(store.file_table_path(&commit), TABLE).unwrap();
        assert!(!store.has_results(&commit));
    }

    #[test]
    fn test_missing_outputs_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsResultStore::new(dir.path());
        let commit = CommitUrl::parse("https://github.com/owner/repo/commit/abc").unwrap();
        let smells = CommitSmells::load(&store, &commit);
        assert!(smells.files.is_empty());
        assert!(smells.methods.is_empty());
    }
}
