use std::path::PathBuf;
use thiserror::Error;

use super::batch_status::{BatchStatus, Stage};
use super::segmenter::Phase;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("No {field} token was found in {path}")]
    NotFound { field: &'static str, path: String },
    #[error("Could not parse {field} value '{value}' found in {path}")]
    BadNumber {
        field: &'static str,
        value: String,
        path: String,
    },
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Could not open log because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Log failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Log failed to parse CSV: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Required column '{0}' is missing from the log")]
    MissingColumn(String),
    #[error("Could not parse value '{value}' in column '{column}' at row {row}")]
    BadValue {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Timestamps are not strictly increasing at row {0}")]
    NonIncreasingTime(usize),
    #[error("At least two rows are required to compute a timestep, found {0}")]
    TooFewRows(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config contains an invalid pattern: {0}")]
    BadPattern(#[from] regex::Error),
    #[error("Config contains an invalid value: {0}")]
    InvalidValue(String),
    #[error("Date not found in {0}; expected a YYYYMMDD token")]
    MissingDate(String),
    #[error("Repeat count not found in {0}; expected a 'rep=N' token or a configured repeat count")]
    MissingRepeatCount(String),
    #[error("No saturation ppm is configured for analyte {0}")]
    MissingSaturationPpm(String),
    #[error("No sensor label matched in {0} and none was supplied")]
    MissingSensorLabel(String),
}

#[derive(Debug, Error)]
pub enum RepeatSplitError {
    #[error("RepeatSplitter failed due to log error: {0}")]
    TableError(#[from] TableError),
    #[error("RepeatSplitter failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("RepeatSplitter found no repeat with both on and off cycle rows")]
    NoMatchingRepeats,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Sink failed to write CSV: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Sink failed to serialize JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Directory {0:?} is locked by another run")]
    Locked(PathBuf),
}

/// A step whose window is shorter than the minimum exposure duration.
///
/// Not an error for the file: the step is dropped and this value is reported.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Step {step} dropped: {phase} window has {rows} rows, {required} required")]
pub struct InsufficientData {
    pub step: u32,
    pub phase: Phase,
    pub rows: usize,
    pub required: usize,
}

/// A phase filter that selected no rows at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("No {phase} rows selected for step {step} of {series}")]
pub struct EmptySelection {
    pub series: String,
    pub step: u32,
    pub phase: Phase,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to metadata error: {0}")]
    MetadataError(#[from] MetadataError),
    #[error("Processor failed due to log error: {0}")]
    TableError(#[from] TableError),
    #[error("Processor failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to RepeatSplitter error: {0}")]
    RepeatSplitError(#[from] RepeatSplitError),
    #[error("Processor failed due to sink error: {0}")]
    SinkError(#[from] SinkError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<BatchStatus>),
}

/// A failure while processing one input, tagged with the stage it happened in
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct FileError {
    pub stage: Stage,
    pub source: ProcessorError,
}
