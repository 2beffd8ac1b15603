//! Metadata carried by log file names.
//!
//! Experiment batches name their files inconsistently, so every field is found by
//! substring or pattern search over the whole name rather than by splitting on a
//! delimiter. Vocabulary fields return every configured token present in the name,
//! in the order the vocabulary lists them.
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use time::macros::format_description;
use time::Date;

use super::config::Config;
use super::error::{ConfigError, MetadataError};

fn ppm_regex() -> &'static Regex {
    static PPM: OnceLock<Regex> = OnceLock::new();
    PPM.get_or_init(|| Regex::new(r"(\d+)ppm").expect("valid regex"))
}

fn date_regex() -> &'static Regex {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| Regex::new(r"\d{8}").expect("valid regex"))
}

fn repeat_regex() -> &'static Regex {
    static REPEAT: OnceLock<Regex> = OnceLock::new();
    REPEAT.get_or_init(|| Regex::new(r"rep=(\d+)").expect("valid regex"))
}

/// Everything a file name says about the exposure it records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub analytes: Vec<String>,
    pub materials: Vec<String>,
    pub concentrations: Vec<u64>,
    pub date: String,
    pub repeat: Option<u32>,
    pub sensor: Option<String>,
}

impl Metadata {
    /// Interpret the date token as a YYYYMMDD calendar date
    pub fn calendar_date(&self) -> Option<Date> {
        Date::parse(&self.date, format_description!("[year][month][day]")).ok()
    }

    pub fn primary_analyte(&self) -> &str {
        &self.analytes[0]
    }

    pub fn primary_material(&self) -> &str {
        &self.materials[0]
    }
}

/// Return all vocabulary tokens found in `path`, in vocabulary order
pub fn match_vocabulary(
    path: &str,
    vocabulary: &[String],
    field: &'static str,
) -> Result<Vec<String>, MetadataError> {
    let found: Vec<String> = vocabulary
        .iter()
        .filter(|token| !token.is_empty() && path.contains(token.as_str()))
        .cloned()
        .collect();
    if found.is_empty() {
        Err(MetadataError::NotFound {
            field,
            path: path.to_string(),
        })
    } else {
        Ok(found)
    }
}

/// Return every `<digits>ppm` value in `path`, left to right
pub fn extract_concentrations(path: &str) -> Result<Vec<u64>, MetadataError> {
    let values = ppm_regex()
        .captures_iter(path)
        .map(|cap| {
            cap[1].parse::<u64>().map_err(|_| MetadataError::BadNumber {
                field: "concentration",
                value: cap[1].to_string(),
                path: path.to_string(),
            })
        })
        .collect::<Result<Vec<u64>, MetadataError>>()?;
    if values.is_empty() {
        Err(MetadataError::NotFound {
            field: "concentration",
            path: path.to_string(),
        })
    } else {
        Ok(values)
    }
}

/// The first 8-digit token of the base file name
pub fn extract_date(path: &str) -> Result<String, MetadataError> {
    date_regex()
        .find(&base_name(path))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| MetadataError::NotFound {
            field: "date",
            path: path.to_string(),
        })
}

/// The last `rep=<digits>` value in `path`.
///
/// Repeat sub-logs keep the source name (which carries the repeat count) and append their
/// own repeat index, so the last occurrence is the most specific one.
pub fn extract_repeat(path: &str) -> Result<u32, MetadataError> {
    let cap = repeat_regex()
        .captures_iter(path)
        .last()
        .ok_or_else(|| MetadataError::NotFound {
            field: "repeat",
            path: path.to_string(),
        })?;
    cap[1].parse().map_err(|_| MetadataError::BadNumber {
        field: "repeat",
        value: cap[1].to_string(),
        path: path.to_string(),
    })
}

/// The last match of the sensor pattern, including a `.<relay>` suffix when one follows
pub fn extract_sensor(path: &str, pattern: &Regex) -> Option<String> {
    let name = base_name(path);
    let found = pattern.find_iter(&name).last()?;
    let mut sensor = found.as_str().to_string();
    let rest = &name[found.end()..];
    if let Some(suffix) = rest.strip_prefix('.') {
        let digits: String = suffix.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            sensor.push('.');
            sensor.push_str(&digits);
        }
    }
    Some(sensor)
}

/// File name without directories or a trailing .csv/.json/.txt extension
fn base_name(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());
    for ext in [".csv", ".json", ".txt"] {
        if name.len() > ext.len() && name.to_ascii_lowercase().ends_with(ext) {
            return name[..name.len() - ext.len()].to_string();
        }
    }
    name
}

/// Extracts [`Metadata`] from paths using a fixed vocabulary and sensor pattern
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    analytes: Vec<String>,
    materials: Vec<String>,
    sensor_pattern: Regex,
    require_concentration: bool,
}

impl MetadataExtractor {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            analytes: config.analytes.clone(),
            materials: config.materials.clone(),
            sensor_pattern: config.sensor_regex()?,
            require_concentration: config.requires_filename_concentration(),
        })
    }

    /// Extract all fields from a path. Analytes, materials and the date are always
    /// required; concentrations are required unless they come from the flow columns.
    pub fn extract(&self, path: &str) -> Result<Metadata, MetadataError> {
        let analytes = match_vocabulary(path, &self.analytes, "analyte")?;
        let materials = match_vocabulary(path, &self.materials, "material")?;
        let concentrations = match extract_concentrations(path) {
            Ok(values) => values,
            Err(MetadataError::NotFound { .. }) if !self.require_concentration => vec![],
            Err(e) => return Err(e),
        };
        let date = extract_date(path)?;
        let repeat = match extract_repeat(path) {
            Ok(repeat) => Some(repeat),
            Err(MetadataError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        let sensor = extract_sensor(path, &self.sensor_pattern);

        let metadata = Metadata {
            analytes,
            materials,
            concentrations,
            date,
            repeat,
            sensor,
        };
        if metadata.calendar_date().is_none() {
            log::warn!(
                "Date token {} in {} is not a valid calendar date",
                metadata.date,
                path
            );
        }
        Ok(metadata)
    }
}
