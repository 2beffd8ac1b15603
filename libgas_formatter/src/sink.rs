//! Output sinks. All files written by the crate go through this module.
//!
//! Sinks never overwrite: a name that is already taken gets a `_<n>` suffix. Output
//! directories are only cleared on request, and only through the lock that holds them.
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::error::SinkError;
use super::record::ExposureRecord;
use super::relay::ChannelSeries;
use super::repeat_splitter::RepeatLog;

pub const LOCK_FILE_NAME: &str = ".gas_formatter.lock";
const JSON_INDENT: &[u8] = b"    ";
const TABLE_HEADER: [&str; 5] = ["filename", "analyte", "ppm", "on_cycle", "off_cycle"];

/// First free path among `<stem>.<ext>`, `<stem>_1.<ext>`, `<stem>_2.<ext>`, ...
pub fn unique_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{stem}.{extension}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{n}.{extension}"));
        n += 1;
    }
    candidate
}

/// Write a finished buffer to a fresh path and log its size
fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    std::fs::write(path, bytes)?;
    log::info!(
        "Wrote {} ({})",
        path.display(),
        human_bytes::human_bytes(bytes.len() as f64)
    );
    Ok(())
}

/// Comma separated readings, as stored in the table's cycle columns
fn join_readings(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<String>>()
        .join(",")
}

/// Exclusive hold on an output directory for the duration of a batch.
///
/// The lock file is created with create-new semantics and removed on drop.
#[derive(Debug)]
pub struct OutputLock {
    dir: PathBuf,
    path: PathBuf,
}

impl OutputLock {
    pub fn acquire(dir: &Path) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                log::error!("{} is locked by another run", dir.display());
                return Err(SinkError::Locked(dir.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        Ok(Self {
            dir: dir.to_path_buf(),
            path,
        })
    }

    /// Remove everything in the locked directory except the lock itself.
    /// Returns the number of entries removed.
    pub fn clear(&self) -> Result<usize, SinkError> {
        let mut removed = 0;
        for item in self.dir.read_dir()? {
            let path = item?.path();
            if path == self.path {
                continue;
            }
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            removed += 1;
        }
        log::info!("Cleared {} entries from {}", removed, self.dir.display());
        Ok(removed)
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Could not remove lock {}: {e}", self.path.display());
        }
    }
}

/// Destination for finished exposure records
pub trait RecordSink {
    fn write(&mut self, record: &ExposureRecord) -> Result<(), SinkError>;
}

/// One pretty-printed JSON file per record, named after the record
#[derive(Debug, Clone)]
pub struct JsonSink {
    dir: PathBuf,
}

impl JsonSink {
    pub fn new(dir: &Path) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }
}

impl RecordSink for JsonSink {
    fn write(&mut self, record: &ExposureRecord) -> Result<(), SinkError> {
        let mut bytes = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(JSON_INDENT);
        let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
        record.serialize(&mut serializer)?;
        let path = unique_path(&self.dir, &record.filename, "json");
        write_bytes(&path, &bytes)
    }
}

/// Append-only CSV table with one row per record
#[derive(Debug, Clone)]
pub struct TableSink {
    path: PathBuf,
}

impl TableSink {
    pub fn new(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl RecordSink for TableSink {
    fn write(&mut self, record: &ExposureRecord) -> Result<(), SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut writer = csv::Writer::from_writer(file);
        if is_new {
            writer.write_record(TABLE_HEADER)?;
        }
        writer.write_record([
            record.filename.clone(),
            record.analytes.join(","),
            record.ppm.to_string(),
            join_readings(record.on.as_slice()),
            join_readings(record.off.as_slice()),
        ])?;
        writer.flush()?;
        log::debug!("Appended {} to {}", record.filename, self.path.display());
        Ok(())
    }
}

/// CSV files of intermediate data: per-sensor series and repeat sub-logs
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: &Path) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn write_series(&self, series: &ChannelSeries) -> Result<PathBuf, SinkError> {
        let mut bytes = Vec::new();
        series.write_csv(&mut bytes)?;
        let path = unique_path(&self.dir, &series.name, "csv");
        write_bytes(&path, &bytes)?;
        Ok(path)
    }

    pub fn write_repeat(&self, repeat: &RepeatLog) -> Result<PathBuf, SinkError> {
        let mut bytes = Vec::new();
        repeat.log.write_csv(&mut bytes)?;
        let path = unique_path(&self.dir, &repeat.name, "csv");
        write_bytes(&path, &bytes)?;
        Ok(path)
    }
}
