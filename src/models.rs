use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Smell columns reported by TestSmellDetector, in output order.
pub const SMELL_COLUMNS: [&str; 22] = [
    "Assertion Roulette",
    "Conditional Test Logic",
    "Constructor Initialization",
    "Default Test",
    "EmptyTest",
    "Exception Catching Throwing",
    "General Fixture",
    "Mystery Guest",
    "Print Statement",
    "Redundant Assertion",
    "Sensitive Equality",
    "Verbose Test",
    "Sleepy Test",
    "Eager Test",
    "Lazy Test",
    "Duplicate Assert",
    "Unknown Test",
    "IgnoredTest",
    "Resource Optimism",
    "Magic Number Test",
    "Dependent Test",
    "NumberOfMethods",
];

/// Refactoring type used when an annotation carries none.
pub const UNKNOWN_REFACTORING: &str = "UnknownRefactoring";

/// Smell parent type marking method-scoped smells in `smells_result.json`.
pub const METHOD_PARENT_TYPE: &str = "Method";

/// Per-smell occurrence counts. Ordered so that output is deterministic.
pub type SmellCounts = BTreeMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("Not a commit URL: {0}")]
    NotACommitUrl(String),
}

/// Granularity at which smells are counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SmellLevel {
    /// Per test file counts from `smells_number.csv`
    File,
    /// Per test method records from `smells_result.json`
    Method,
}

impl Display for SmellLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Method => write!(f, "method"),
        }
    }
}

/// A parsed `<scheme>://<host>/<owner>/<repo>/commit/<sha>` URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitUrl {
    base: String,
    owner: String,
    repo: String,
    sha: String,
}

impl CommitUrl {
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        let trimmed = url.trim().trim_end_matches('/');
        let (scheme, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| UrlError::NotACommitUrl(url.to_string()))?;

        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [host, owner, repo, "commit", sha]
                if [host, owner, repo, sha].iter().all(|p| !p.is_empty()) =>
            {
                Ok(Self {
                    base: format!("{}://{}", scheme, host),
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    sha: sha.to_string(),
                })
            }
            _ => Err(UrlError::NotACommitUrl(url.to_string())),
        }
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    /// Repository URL without the `/commit/<sha>` suffix.
    pub fn repo_url(&self) -> String {
        format!("{}/{}/{}", self.base, self.owner, self.repo)
    }

    /// Relative directory under which detector output for this commit lives.
    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.owner, self.repo, self.sha)
    }

    /// Relative directory of the repository clone used by the detector.
    pub fn repo_key(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Same repository, different commit.
    pub fn with_sha(&self, sha: impl Into<String>) -> Self {
        Self {
            base: self.base.clone(),
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            sha: sha.into(),
        }
    }
}

impl Display for CommitUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/commit/{}", self.repo_url(), self.sha)
    }
}

/// Inclusive line range of an annotated code element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRange {
    pub start_line: i64,
    pub end_line: i64,
}

impl LineRange {
    pub fn new(start_line: i64, end_line: i64) -> Self {
        Self {
            start_line,
            end_line,
        }
    }

    /// True when `[begin, end]` shares at least one line with this range.
    pub fn overlaps(&self, begin: i64, end: i64) -> bool {
        !(begin > self.end_line || end < self.start_line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    #[serde(default)]
    pub range: Option<LineRange>,
}

impl Location {
    /// Final path component, used to match detector output paths.
    pub fn file_name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.path)
    }
}

/// A code element referenced by an annotation parameter.
///
/// The annotation server exports `"location": null` for elements it could
/// not place; those are ignored when counting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeElement {
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub elements: Vec<CodeElement>,
}

/// One side (`before` or `after`) of an annotation: parameter name to elements.
pub type ParameterSide = BTreeMap<String, ParameterEntry>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub before: ParameterSide,
    #[serde(default, deserialize_with = "null_as_default")]
    pub after: ParameterSide,
}

/// Iterate the locations of one side, parameter by parameter.
/// Elements without a location are skipped.
pub fn side_locations(side: &ParameterSide) -> impl Iterator<Item = &Location> {
    side.values()
        .flat_map(|entry| entry.elements.iter())
        .filter_map(|element| element.location.as_ref())
}

/// One annotated refactoring as exported from the annotation server.
///
/// `parameter_data` is kept as raw JSON so that a malformed record only
/// fails its own commit group, see [`Refactoring::parameters`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refactoring {
    pub url: String,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub parameter_data: serde_json::Value,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Refactoring {
    pub fn type_name(&self) -> &str {
        self.type_name.as_deref().unwrap_or(UNKNOWN_REFACTORING)
    }

    /// Typed view of `parameter_data`. Missing or `null` reads as empty.
    pub fn parameters(&self) -> Result<ParameterData, serde_json::Error> {
        if self.parameter_data.is_null() {
            return Ok(ParameterData::default());
        }
        ParameterData::deserialize(&self.parameter_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commit_url() {
        let url = CommitUrl::parse("https://github.com/owner/repo/commit/abc123").unwrap();
        assert_eq!(url.sha(), "abc123");
        assert_eq!(url.repo_url(), "https://github.com/owner/repo");
        assert_eq!(url.cache_key(), "owner/repo/abc123");
        assert_eq!(url.repo_key(), "owner/repo");
        assert_eq!(
            url.to_string(),
            "https://github.com/owner/repo/commit/abc123"
        );
    }

    #[test]
    fn test_parse_rejects_non_commit_urls() {
        assert!(CommitUrl::parse("https://github.com/owner/repo").is_err());
        assert!(CommitUrl::parse("https://github.com/owner/repo/tree/abc").is_err());
        assert!(CommitUrl::parse("owner/repo/commit/abc").is_err());
        assert_eq!(
            CommitUrl::parse("https://github.com/owner/repo/commit/"),
            Err(UrlError::NotACommitUrl(
                "https://github.com/owner/repo/commit/".to_string()
            ))
        );
    }

    #[test]
    fn test_with_sha_keeps_repository() {
        let url = CommitUrl::parse("https://github.com/owner/repo/commit/child").unwrap();
        let parent = url.with_sha("parent");
        assert_eq!(
            parent.to_string(),
            "https://github.com/owner/repo/commit/parent"
        );
    }

    #[test]
    fn test_line_range_overlap() {
        let range = LineRange::new(10, 20);
        assert!(range.overlaps(5, 10));
        assert!(range.overlaps(20, 30));
        assert!(range.overlaps(12, 15));
        assert!(range.overlaps(1, 100));
        assert!(!range.overlaps(1, 9));
        assert!(!range.overlaps(21, 25));
    }

    #[test]
    fn test_location_file_name() {
        let location = Location {
            path: "src/test/java/FooTest.java".to_string(),
            range: None,
        };
        assert_eq!(location.file_name(), "FooTest.java");
    }

    #[test]
    fn test_refactoring_deserializes_annotation_record() {
        let json = r#"{
            "url": "https://github.com/o/r/commit/c",
            "type_name": "Extract Method",
            "annotator_name": "ignored",
            "parameter_data": {
                "before": {
                    "target": {
                        "elements": [
                            {"location": {"path": "a/FooTest.java",
                                          "range": {"startLine": 3, "endLine": 9}}}
                        ]
                    }
                },
                "after": {}
            }
        }"#;
        let refactoring: Refactoring = serde_json::from_str(json).unwrap();
        assert_eq!(refactoring.type_name(), "Extract Method");
        let params = refactoring.parameters().unwrap();
        let locations: Vec<_> = side_locations(&params.before).collect();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].range, Some(LineRange::new(3, 9)));
    }

    #[test]
    fn test_missing_type_name_defaults() {
        let refactoring: Refactoring =
            serde_json::from_str(r#"{"url": "https://github.com/o/r/commit/c"}"#).unwrap();
        assert_eq!(refactoring.type_name(), UNKNOWN_REFACTORING);
        assert!(refactoring.parameters().unwrap().before.is_empty());
    }

    #[test]
    fn test_null_parts_read_as_empty() {
        let json = r#"{
            "url": "https://github.com/o/r/commit/c",
            "parameter_data": {
                "before": {
                    "source": {"elements": [
                        {"location": null},
                        {"location": {"path": "a/FooTest.java"}}
                    ]},
                    "extra": {"elements": null}
                },
                "after": null
            }
        }"#;
        let refactoring: Refactoring = serde_json::from_str(json).unwrap();
        let params = refactoring.parameters().unwrap();
        let paths: Vec<_> = side_locations(&params.before).map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["a/FooTest.java"]);
        assert!(params.after.is_empty());
    }

    #[test]
    fn test_malformed_parameters_fail_only_on_access() {
        let json = r#"{
            "url": "https://github.com/o/r/commit/c",
            "type_name": "Rename",
            "parameter_data": {"before": {"x": {"elements": [
                {"location": {"range": {"startLine": 1}}}
            ]}}}
        }"#;
        let refactoring: Refactoring = serde_json::from_str(json).unwrap();
        assert_eq!(refactoring.type_name(), "Rename");
        assert!(refactoring.parameters().is_err());
    }
}
