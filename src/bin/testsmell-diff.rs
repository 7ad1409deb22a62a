use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use clap::Parser;
use log::LevelFilter;

use testsmell_diff::app::App;
use testsmell_diff::cancel;
use testsmell_diff::cli::Cli;
use testsmell_diff::config::{PathOverrides, PipelineConfig};
use testsmell_diff::detector::JarDetector;

/// Writes every log record to stderr, and a timestamped copy to the log file.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        write!(self.file, "{} ", stamp)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity flags
    let log_level = if cli.quiet {
        LevelFilter::Error
    } else {
        match cli.verbosity {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    let mut logger = env_logger::Builder::new();
    logger
        .filter_level(log_level)
        .format_target(false)
        .format_timestamp(None);

    let mut log_file_error = None;
    if let Some(path) = &cli.log_file {
        match open_log_file(path) {
            Ok(file) => {
                logger.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
            }
            Err(e) => log_file_error = Some(format!("{}: {}", path.display(), e)),
        }
    }
    logger.init();
    if let Some(e) = log_file_error {
        log::warn!("Cannot open log file {}", e);
    }

    cancel::register_handler();

    // Environment first, then CLI flags on top
    let overrides = PathOverrides::from_env().with_overrides(cli.paths.into_overrides());
    let config = PipelineConfig::resolve(overrides);
    log::debug!("Using configuration: {:?}", config);

    let detector = JarDetector::new(&config.java, &config.jar, &config.detector_dir);
    let app = App::new(config, detector);

    if let Err(err) = app.run(cli.command) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
