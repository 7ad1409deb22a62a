//! Change-pattern summaries over the wide diff CSVs.
//!
//! Each `(row, smell)` pair of a wide CSV is one observation. A pair is an
//! improvement when the smell count dropped, a degradation when it grew.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use log::info;

use crate::models::SmellLevel;

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid wide CSV in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("Column '{column}' missing from {path}")]
    MissingColumn { path: String, column: String },
}

/// One refactoring × smell pair from a wide CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub commit_url: String,
    pub type_name: String,
    pub test_smell: String,
    pub before: f64,
    pub after: f64,
    pub diff: f64,
}

pub fn wide_file_name(level: SmellLevel) -> String {
    format!("{}_level_wide.csv", level)
}

pub fn patterns_file_name(level: SmellLevel) -> String {
    format!("change_patterns_{}.csv", level)
}

pub fn type_summary_file_name(level: SmellLevel) -> String {
    format!("refactoring_type_testsmell_summary_{}.csv", level)
}

fn cell_value(cell: Option<&str>) -> f64 {
    cell.and_then(|c| c.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

pub fn load_wide(path: &Path) -> Result<Vec<Observation>, SummaryError> {
    let file = fs::File::open(path).map_err(|source| SummaryError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_wide(file, &path.display().to_string())
}

/// Reshape a wide CSV into observations, one per row and `_diff` column.
///
/// Empty or missing cells read as 0.
pub fn read_wide<R: Read>(reader: R, origin: &str) -> Result<Vec<Observation>, SummaryError> {
    let csv_err = |source| SummaryError::Csv {
        path: origin.to_string(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let position = |name: &str| headers.iter().position(|h| h == name);
    let required = |name: &str| {
        position(name).ok_or_else(|| SummaryError::MissingColumn {
            path: origin.to_string(),
            column: name.to_string(),
        })
    };
    let url_col = required("commit_url")?;
    let type_col = required("type_name")?;

    // (smell, before column, after column, diff column)
    let smells: Vec<(String, Option<usize>, Option<usize>, usize)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| {
            let smell = h.strip_suffix("_diff")?;
            Some((
                smell.to_string(),
                position(&format!("{}_before", smell)),
                position(&format!("{}_after", smell)),
                i,
            ))
        })
        .collect();

    let mut observations = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let commit_url = record.get(url_col).unwrap_or_default();
        let type_name = record.get(type_col).unwrap_or_default();
        for (smell, before_col, after_col, diff_col) in &smells {
            observations.push(Observation {
                commit_url: commit_url.to_string(),
                type_name: type_name.to_string(),
                test_smell: smell.clone(),
                before: cell_value(before_col.and_then(|c| record.get(c))),
                after: cell_value(after_col.and_then(|c| record.get(c))),
                diff: cell_value(record.get(*diff_col)),
            });
        }
    }
    Ok(observations)
}

/// Improvement/degradation tally for a set of observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternStats {
    pub total: usize,
    pub improvements: usize,
    pub degradations: usize,
    pub no_changes: usize,
    changed_diffs: Vec<f64>,
}

impl PatternStats {
    pub fn push(&mut self, before: f64, after: f64) {
        self.total += 1;
        if after < before {
            self.improvements += 1;
        } else if after > before {
            self.degradations += 1;
        } else {
            self.no_changes += 1;
            return;
        }
        self.changed_diffs.push(after - before);
    }

    fn rate(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64 * 100.0
        }
    }

    pub fn improvement_rate(&self) -> f64 {
        self.rate(self.improvements)
    }

    pub fn degradation_rate(&self) -> f64 {
        self.rate(self.degradations)
    }

    pub fn no_change_rate(&self) -> f64 {
        self.rate(self.no_changes)
    }

    pub fn has_changes(&self) -> bool {
        self.improvements + self.degradations > 0
    }

    /// Mean over population standard deviation of the non-zero differences.
    ///
    /// 0 with fewer than two changed pairs or when every change is equal.
    pub fn effect_size(&self) -> f64 {
        let n = self.changed_diffs.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.changed_diffs.iter().sum::<f64>() / n as f64;
        let variance = self
            .changed_diffs
            .iter()
            .map(|d| (d - mean).powi(2))
            .sum::<f64>()
            / n as f64;
        let std = variance.sqrt();
        if std > 0.0 {
            mean / std
        } else {
            0.0
        }
    }

    fn columns(&self) -> Vec<String> {
        vec![
            self.total.to_string(),
            self.improvements.to_string(),
            self.degradations.to_string(),
            self.no_changes.to_string(),
            self.improvement_rate().to_string(),
            self.degradation_rate().to_string(),
            self.no_change_rate().to_string(),
            self.effect_size().to_string(),
        ]
    }
}

/// Per-smell change patterns, sorted by smell name.
pub fn change_patterns(observations: &[Observation]) -> BTreeMap<String, PatternStats> {
    let mut patterns: BTreeMap<String, PatternStats> = BTreeMap::new();
    for obs in observations {
        patterns
            .entry(obs.test_smell.clone())
            .or_default()
            .push(obs.before, obs.after);
    }
    patterns
}

/// Change patterns per `(smell, refactoring type)`, sorted by smell then type.
pub fn patterns_by_type(observations: &[Observation]) -> BTreeMap<(String, String), PatternStats> {
    let mut patterns: BTreeMap<(String, String), PatternStats> = BTreeMap::new();
    for obs in observations {
        patterns
            .entry((obs.test_smell.clone(), obs.type_name.clone()))
            .or_default()
            .push(obs.before, obs.after);
    }
    patterns
}

pub fn patterns_table(
    patterns: &BTreeMap<String, PatternStats>,
) -> (Vec<String>, Vec<Vec<String>>) {
    let header = [
        "test_smell",
        "total_pairs",
        "improvements",
        "degradations",
        "no_changes",
        "improvement_rate",
        "degradation_rate",
        "no_change_rate",
        "effect_size",
        "has_changes",
    ]
    .map(String::from)
    .to_vec();

    let rows = patterns
        .iter()
        .map(|(smell, stats)| {
            let mut row = vec![smell.clone()];
            row.extend(stats.columns());
            row.push(stats.has_changes().to_string());
            row
        })
        .collect();
    (header, rows)
}

pub fn type_summary_table(
    patterns: &BTreeMap<(String, String), PatternStats>,
) -> (Vec<String>, Vec<Vec<String>>) {
    let header = [
        "type_name",
        "test_smell",
        "total",
        "improvements",
        "degradations",
        "no_changes",
        "improvement_rate",
        "degradation_rate",
        "no_change_rate",
        "effect_size",
    ]
    .map(String::from)
    .to_vec();

    let rows = patterns
        .iter()
        .map(|((smell, type_name), stats)| {
            let mut row = vec![type_name.clone(), smell.clone()];
            row.extend(stats.columns());
            row
        })
        .collect();
    (header, rows)
}

/// Log one line per smell, as a quick overview of a level.
pub fn log_patterns(level: SmellLevel, patterns: &BTreeMap<String, PatternStats>) {
    info!("Change patterns at {} level:", level);
    for (smell, stats) in patterns {
        info!(
            "  {}: total {}, improvements {} ({:.1}%), degradations {} ({:.1}%), no change {} ({:.1}%)",
            smell,
            stats.total,
            stats.improvements,
            stats.improvement_rate(),
            stats.degradations,
            stats.degradation_rate(),
            stats.no_changes,
            stats.no_change_rate()
        );
    }
}
