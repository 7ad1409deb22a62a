//! Shared test utilities for creating test fixtures.
//!
//! This module provides helper functions for creating annotation data and
//! detector output used across multiple test modules.

use std::fs;

use crate::models::{
    CodeElement, CommitUrl, LineRange, Location, ParameterData, ParameterEntry, ParameterSide,
    Refactoring,
};
use crate::store::FsResultStore;

/// Create a refactoring with no annotated elements
pub fn make_refactoring(url: &str, type_name: &str) -> Refactoring {
    make_refactoring_full(url, type_name, ParameterSide::new(), ParameterSide::new())
}

/// Create a refactoring with both sides filled in
pub fn make_refactoring_full(
    url: &str,
    type_name: &str,
    before: ParameterSide,
    after: ParameterSide,
) -> Refactoring {
    Refactoring {
        url: url.to_string(),
        type_name: Some(type_name.to_string()),
        parameter_data: serde_json::to_value(ParameterData { before, after }).unwrap(),
    }
}

/// Create a code element without a line range
pub fn element(path: &str) -> CodeElement {
    CodeElement {
        location: Some(Location {
            path: path.to_string(),
            range: None,
        }),
    }
}

/// Create a code element covering `start..=end`
pub fn element_in_range(path: &str, start: i64, end: i64) -> CodeElement {
    CodeElement {
        location: Some(Location {
            path: path.to_string(),
            range: Some(LineRange::new(start, end)),
        }),
    }
}

/// Put elements under a single parameter
pub fn side(elements: Vec<CodeElement>) -> ParameterSide {
    ParameterSide::from([("target".to_string(), ParameterEntry { elements })])
}

/// Write both detector outputs for a commit
pub fn write_commit_results(store: &FsResultStore, commit: &CommitUrl, csv: &str, json: &str) {
    let dir = store.results_dir(commit);
    fs::create_dir_all(&dir).unwrap();
    fs::write(store.file_table_path(commit), csv).unwrap();
    fs::write(store.method_report_path(commit), json).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResultStore;

    #[test]
    fn test_make_refactoring() {
        let refactoring = make_refactoring_full(
            "https://github.com/o/r/commit/a",
            "Rename",
            ParameterSide::new(),
            side(vec![element("A.java")]),
        );
        assert_eq!(refactoring.type_name(), "Rename");
        let params = refactoring.parameters().unwrap();
        assert!(params.before.is_empty());
        assert_eq!(params.after["target"].elements, vec![element("A.java")]);
    }

    #[test]
    fn test_side_collects_elements() {
        let side = side(vec![element("A.java"), element_in_range("B.java", 1, 3)]);
        assert_eq!(side["target"].elements.len(), 2);
        let range = side["target"].elements[1].location.as_ref().and_then(|l| l.range);
        assert_eq!(range, Some(LineRange::new(1, 3)));
    }

    #[test]
    fn test_write_commit_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsResultStore::new(dir.path());
        let commit = CommitUrl::parse("https://github.com/o/r/commit/a").unwrap();
        write_commit_results(&store, &commit, "TestFilePath\n", "[]");
        assert!(store.has_results(&commit));
    }
}
