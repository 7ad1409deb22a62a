use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

/// Byte-order mark written ahead of CSV output so spreadsheet tools pick UTF-8.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode CSV for {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("Failed to encode JSON for {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl OutputError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Create the directory if needed and return it.
pub fn ensure_dir(dir: &Path) -> Result<&Path, OutputError> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| OutputError::io(dir, e))?;
        info!("Created output directory: {}", dir.display());
    }
    Ok(dir)
}

/// Path of `file_name` inside `dir`, creating `dir` if needed.
pub fn output_path(dir: &Path, file_name: &str) -> Result<PathBuf, OutputError> {
    Ok(ensure_dir(dir)?.join(file_name))
}

/// Write into a temp file next to `path`, then rename over it.
fn write_atomic<F>(path: &Path, write: F) -> Result<(), OutputError>
where
    F: FnOnce(&mut tempfile::NamedTempFile) -> Result<(), OutputError>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_dir(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| OutputError::io(path, e))?;
    write(&mut temp)?;
    temp.flush().map_err(|e| OutputError::io(path, e))?;
    temp.persist(path)
        .map_err(|e| OutputError::io(path, e.error))?;
    Ok(())
}

/// Write a BOM-prefixed CSV file.
pub fn write_csv(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<(), OutputError> {
    write_atomic(path, |temp| {
        temp.write_all(UTF8_BOM)
            .map_err(|e| OutputError::io(path, e))?;
        let csv_err = |source| OutputError::Csv {
            path: path.display().to_string(),
            source,
        };
        let mut writer = csv::Writer::from_writer(temp);
        writer.write_record(header).map_err(csv_err)?;
        for row in rows {
            writer.write_record(row).map_err(csv_err)?;
        }
        writer.flush().map_err(|e| OutputError::io(path, e))
    })
}

/// Write pretty-printed JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), OutputError> {
    write_atomic(path, |temp| {
        serde_json::to_writer_pretty(&mut *temp, value).map_err(|source| OutputError::Json {
            path: path.display().to_string(),
            source,
        })?;
        temp.write_all(b"\n").map_err(|e| OutputError::io(path, e))
    })
}
