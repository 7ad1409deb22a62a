use log::{error, info, warn};

use crate::cli::{selected_levels, CollectArgs, Command, SummarizeArgs, TotalsArgs};
use crate::collect::{CollectError, CollectReport, Collector};
use crate::config::PipelineConfig;
use crate::detector::Detector;
use crate::diff::{wide_header, DiffCalculator};
use crate::inputs::{load_annotations, InputError, ParentIndex};
use crate::models::{Refactoring, SmellLevel};
use crate::output::{output_path, write_csv, write_json, OutputError};
use crate::store::FsResultStore;
use crate::summary::{self, SummaryError};
use crate::totals::{collect_totals, totals_file_name, totals_table};

pub const FILE_WIDE_NAME: &str = "file_level_wide.csv";
pub const METHOD_WIDE_NAME: &str = "method_level_wide.csv";
pub const ANALYSIS_JSON_NAME: &str = "test_smell_analysis.json";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Summary(#[from] SummaryError),
    #[error("{0}")]
    User(String),
}

pub struct App<D: Detector> {
    config: PipelineConfig,
    detector: D,
    store: FsResultStore,
}

impl<D: Detector> App<D> {
    pub fn new(config: PipelineConfig, detector: D) -> Self {
        let store = FsResultStore::new(&config.detector_dir);
        Self {
            config,
            detector,
            store,
        }
    }

    pub fn run(&self, command: Command) -> Result<(), AppError> {
        match command {
            Command::Collect(opts) => self.handle_collect(opts).map(|_| ()),
            Command::Diff => self.handle_diff(),
            Command::Totals(opts) => self.handle_totals(opts),
            Command::Summarize(opts) => self.handle_summarize(opts),
        }
    }

    fn load_inputs(&self) -> Result<(Vec<Refactoring>, ParentIndex), AppError> {
        let refactorings = load_annotations(&self.config.annotations)?;
        let parents = ParentIndex::load(&self.config.commits)?;
        info!(
            "Loaded {} refactorings and {} sampled commits",
            refactorings.len(),
            parents.len()
        );
        Ok((refactorings, parents))
    }

    pub fn handle_collect(&self, opts: CollectArgs) -> Result<CollectReport, AppError> {
        let (refactorings, parents) = self.load_inputs()?;

        let collector = Collector::new(&self.detector, &self.store, &parents)
            .with_retry(opts.retry_policy())
            .with_lock_policy(opts.lock_policy());
        let report = if opts.jobs > 1 {
            collector.run_parallel(&refactorings, opts.jobs)?
        } else {
            collector.run_serial(&refactorings)
        };

        info!(
            "Collection finished: {} collected, {} skipped, {} failed, {} without parent",
            report.collected, report.skipped, report.failed, report.no_parent
        );
        if report.invalid > 0 {
            warn!("{} annotations had an invalid commit URL", report.invalid);
        }
        if report.cancelled > 0 {
            warn!("Interrupted: {} commits not started", report.cancelled);
        }
        for failure in &report.failures {
            error!("Failed: {}", failure);
        }

        if opts.strict && report.has_failures() {
            return Err(AppError::User(format!(
                "{} detector runs failed",
                report.failed
            )));
        }
        Ok(report)
    }

    fn handle_diff(&self) -> Result<(), AppError> {
        let (refactorings, parents) = self.load_inputs()?;
        let run = DiffCalculator::new(&self.store, &parents).run(&refactorings);
        if !run.skipped_commits.is_empty() {
            warn!(
                "{} commits skipped (no parent or invalid URL)",
                run.skipped_commits.len()
            );
        }

        let out = &self.config.output_dir;
        let header = wide_header();

        let file_path = output_path(out, FILE_WIDE_NAME)?;
        write_csv(&file_path, &header, &run.file_rows())?;
        info!("File-level wide format saved to {}", file_path.display());

        let method_path = output_path(out, METHOD_WIDE_NAME)?;
        write_csv(&method_path, &header, &run.method_rows())?;
        info!("Method-level wide format saved to {}", method_path.display());

        let json_path = output_path(out, ANALYSIS_JSON_NAME)?;
        write_json(&json_path, &run.reports())?;
        info!("Analysis results saved to {}", json_path.display());

        Ok(())
    }

    fn handle_totals(&self, opts: TotalsArgs) -> Result<(), AppError> {
        let (refactorings, parents) = self.load_inputs()?;
        for level in selected_levels(opts.level) {
            let totals = collect_totals(&self.store, &parents, &refactorings, level);
            let (header, rows) = totals_table(&totals);
            let path = output_path(&self.config.output_dir, &totals_file_name(level))?;
            write_csv(&path, &header, &rows)?;
            info!(
                "{}-level totals for {} rows saved to {}",
                level,
                rows.len(),
                path.display()
            );
        }
        Ok(())
    }

    fn handle_summarize(&self, opts: SummarizeArgs) -> Result<(), AppError> {
        for level in selected_levels(opts.level) {
            self.summarize_level(level)?;
        }
        Ok(())
    }

    fn summarize_level(&self, level: SmellLevel) -> Result<(), AppError> {
        let out = &self.config.output_dir;
        let wide = out.join(summary::wide_file_name(level));
        if !wide.is_file() {
            return Err(AppError::User(format!(
                "{} not found; run `testsmell-diff diff` first",
                wide.display()
            )));
        }
        let observations = summary::load_wide(&wide)?;

        let patterns = summary::change_patterns(&observations);
        summary::log_patterns(level, &patterns);
        let (header, rows) = summary::patterns_table(&patterns);
        let path = output_path(out, &summary::patterns_file_name(level))?;
        write_csv(&path, &header, &rows)?;
        info!("Change patterns saved to {}", path.display());

        let (header, rows) = summary::type_summary_table(&summary::patterns_by_type(&observations));
        let path = output_path(out, &summary::type_summary_file_name(level))?;
        write_csv(&path, &header, &rows)?;
        info!("Per-type summary saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::detector::test_support::FakeDetector;

    fn config(dir: &std::path::Path) -> PipelineConfig {
        let config = PipelineConfig::with_base_dir(dir);
        fs::create_dir_all(config.annotations.parent().unwrap()).unwrap();
        fs::create_dir_all(config.commits.parent().unwrap()).unwrap();
        fs::write(
            &config.annotations,
            r#"[{"url": "https://github.com/o/r/commit/child", "type_name": "Rename", "parameter_data": null}]"#,
        )
        .unwrap();
        fs::write(&config.commits, "commit_id,parent_commit_id\nchild,parent\n").unwrap();
        config
    }

    fn collect_args(strict: bool) -> CollectArgs {
        CollectArgs {
            jobs: 1,
            retries: 0,
            backoff: 0,
            max_backoff: 0,
            stale_lock: 3600,
            strict,
        }
    }

    #[test]
    fn test_collect_then_diff_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let detector = FakeDetector::new(FsResultStore::new(&config.detector_dir));
        let app = App::new(config.clone(), detector);

        let report = app.handle_collect(collect_args(true)).unwrap();
        assert_eq!(report.collected, 2);

        app.run(Command::Diff).unwrap();
        assert!(config.output_dir.join(FILE_WIDE_NAME).is_file());
        assert!(config.output_dir.join(METHOD_WIDE_NAME).is_file());
        let json = fs::read_to_string(config.output_dir.join(ANALYSIS_JSON_NAME)).unwrap();
        let reports: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(reports[0]["typeName"], "Rename");

        app.run(Command::Summarize(SummarizeArgs::default())).unwrap();
        assert!(config.output_dir.join("change_patterns_method.csv").is_file());
    }

    #[test]
    fn test_strict_collect_fails_on_detector_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let detector =
            FakeDetector::new(FsResultStore::new(&config.detector_dir)).failing("parent", 1);
        let app = App::new(config, detector);

        let err = app.handle_collect(collect_args(true)).unwrap_err();
        assert!(matches!(err, AppError::User(_)));
    }

    #[test]
    fn test_lenient_collect_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let detector =
            FakeDetector::new(FsResultStore::new(&config.detector_dir)).failing("parent", 1);
        let app = App::new(config, detector);

        let report = app.handle_collect(collect_args(false)).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.collected, 1);
    }

    #[test]
    fn test_missing_jar_only_fails_uncached_commits() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let store = FsResultStore::new(&config.detector_dir);
        for url in [
            "https://github.com/o/r/commit/child",
            "https://github.com/o/r/commit/parent",
        ] {
            let commit = crate::models::CommitUrl::parse(url).unwrap();
            crate::test_utils::write_commit_results(&store, &commit, "TestFilePath\n", "[]");
        }
        let app = App::new(config, FakeDetector::new(store).unavailable());

        let report = app.handle_collect(collect_args(true)).unwrap();
        assert_eq!(report.skipped, 2);
        assert!(!report.has_failures());
    }

    #[test]
    fn test_summarize_requires_wide_csv() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let app = App::new(
            config.clone(),
            FakeDetector::new(FsResultStore::new(&config.detector_dir)),
        );
        let err = app
            .run(Command::Summarize(SummarizeArgs {
                level: Some(SmellLevel::File),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("file_level_wide.csv"));
    }

    #[test]
    fn test_missing_annotations_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_base_dir(dir.path());
        let app = App::new(
            config.clone(),
            FakeDetector::new(FsResultStore::new(&config.detector_dir)),
        );
        assert!(matches!(
            app.run(Command::Totals(TotalsArgs::default())),
            Err(AppError::Input(_))
        ));
    }
}
