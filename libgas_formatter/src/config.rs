use fxhash::FxHashMap;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;

pub const DEFAULT_MAX_RELAYS: u8 = 8;
pub const DEFAULT_MIN_EXPOSURE_SECONDS: f64 = 10.0;
pub const DEFAULT_SENSOR_PATTERN: &str = r"PN\d+";
pub const DEFAULT_REPEAT_ON_PATTERN: &str = r"Run-On Cycle \(Repeat (\d+)\)";
pub const DEFAULT_REPEAT_OFF_PATTERN: &str = r"Off Cycle \(Repeat (\d+)\)";

/// How a log maps onto exposure steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// One log holds one or more concentration steps labeled On1/Off1, On2/Off2, ...
    Cascade,
    /// One log holds several repeats of the same exposure, split before segmenting
    Repeat,
}

/// Which acquisition rig wrote the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rig {
    /// Up to `max_relays` columns named `Relay N Resistance`, or a single `Resistance`
    /// column in a log that was already split per sensor
    RelayResistance,
    /// A single `Current (uA)` column with a `Flow [A:B:C]` column
    FlowCurrent,
}

/// Where the concentration of an exposure step comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcentrationSource {
    Filename,
    FlowRatio,
}

/// What an exposure record holds for a phase that selected no rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptySelectionPolicy {
    /// An empty sequence
    Marker,
    /// The legacy single zero value
    ZeroPlaceholder,
}

/// Structure representing the application configuration. Contains pathing, vocabulary and
/// segmentation policy. Configs are seralizable and deserializable to YAML using serde and
/// serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input_path: PathBuf,
    pub relay_data_path: Option<PathBuf>,
    pub json_path: Option<PathBuf>,
    pub table_path: Option<PathBuf>,
    pub repeat_data_path: Option<PathBuf>,
    pub analytes: Vec<String>,
    pub materials: Vec<String>,
    pub saturation_ppm: FxHashMap<String, f64>,
    pub min_exposure_seconds: f64,
    pub require_baseline: bool,
    pub include_baseline: bool,
    pub max_relays: u8,
    pub discard_relays: Vec<u8>,
    pub sensor_pattern: String,
    pub sensor_label: Option<String>,
    pub mode: ProcessingMode,
    pub repeat_count: Option<u32>,
    pub repeat_on_pattern: String,
    pub repeat_off_pattern: String,
    pub rig: Rig,
    pub concentration_source: ConcentrationSource,
    pub empty_selection: EmptySelectionPolicy,
    pub extract_features: bool,
}

impl Default for Config {
    /// Generate a new Config object with the vocabulary of the standard exposure setup
    fn default() -> Self {
        let mut saturation_ppm = FxHashMap::default();
        saturation_ppm.insert(String::from("Water"), 28483.0);
        saturation_ppm.insert(String::from("EtOH"), 70825.0);
        saturation_ppm.insert(String::from("Ace"), 282973.0);
        saturation_ppm.insert(String::from("IPA"), 52302.0);
        Self {
            input_path: PathBuf::from("None"),
            relay_data_path: Some(PathBuf::from("relay_data")),
            json_path: Some(PathBuf::from("json_folder")),
            table_path: None,
            repeat_data_path: None,
            analytes: vec![
                String::from("IPA"),
                String::from("Water"),
                String::from("EtOH"),
                String::from("Ace"),
            ],
            materials: vec![],
            saturation_ppm,
            min_exposure_seconds: DEFAULT_MIN_EXPOSURE_SECONDS,
            require_baseline: false,
            include_baseline: true,
            max_relays: DEFAULT_MAX_RELAYS,
            discard_relays: vec![],
            sensor_pattern: String::from(DEFAULT_SENSOR_PATTERN),
            sensor_label: None,
            mode: ProcessingMode::Cascade,
            repeat_count: None,
            repeat_on_pattern: String::from(DEFAULT_REPEAT_ON_PATTERN),
            repeat_off_pattern: String::from(DEFAULT_REPEAT_OFF_PATTERN),
            rig: Rig::RelayResistance,
            concentration_source: ConcentrationSource::Filename,
            empty_selection: EmptySelectionPolicy::Marker,
            extract_features: false,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Check the values that cannot be expressed by the types alone
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_relays == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "max_relays must be at least 1",
            )));
        }
        if !self.min_exposure_seconds.is_finite() || self.min_exposure_seconds < 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "min_exposure_seconds must be a non-negative number, found {}",
                self.min_exposure_seconds
            )));
        }
        if self.analytes.is_empty() {
            return Err(ConfigError::InvalidValue(String::from(
                "the analyte vocabulary is empty",
            )));
        }
        if self.materials.is_empty() {
            return Err(ConfigError::InvalidValue(String::from(
                "the material vocabulary is empty",
            )));
        }
        if let Some((analyte, ppm)) = self
            .saturation_ppm
            .iter()
            .find(|(_, ppm)| !ppm.is_finite() || **ppm <= 0.0)
        {
            return Err(ConfigError::InvalidValue(format!(
                "saturation ppm for {analyte} must be positive, found {ppm}"
            )));
        }
        self.sensor_regex()?;
        self.repeat_on_regex()?;
        self.repeat_off_regex()?;
        Ok(())
    }

    /// Compile the sensor name pattern
    pub fn sensor_regex(&self) -> Result<Regex, ConfigError> {
        Ok(Regex::new(&self.sensor_pattern)?)
    }

    /// Compile the on-cycle repeat pattern. Matching is case-insensitive
    pub fn repeat_on_regex(&self) -> Result<Regex, ConfigError> {
        Ok(RegexBuilder::new(&self.repeat_on_pattern)
            .case_insensitive(true)
            .build()?)
    }

    /// Compile the off-cycle repeat pattern. Matching is case-insensitive
    pub fn repeat_off_regex(&self) -> Result<Regex, ConfigError> {
        Ok(RegexBuilder::new(&self.repeat_off_pattern)
            .case_insensitive(true)
            .build()?)
    }

    /// Concentrations must be found in the filename unless they come from the flow columns
    pub fn requires_filename_concentration(&self) -> bool {
        self.concentration_source == ConcentrationSource::Filename
    }

    /// All configured output directories, in the order they are written
    pub fn output_directories(&self) -> Vec<&Path> {
        [
            self.repeat_data_path.as_deref(),
            self.relay_data_path.as_deref(),
            self.json_path.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Collect the input logs: the input path itself, or the sorted .csv files directly inside it
    pub fn get_input_files(&self) -> Result<Vec<PathBuf>, ConfigError> {
        if !self.input_path.exists() {
            return Err(ConfigError::BadFilePath(self.input_path.clone()));
        }
        if self.input_path.is_file() {
            return Ok(vec![self.input_path.clone()]);
        }
        let mut file_list: Vec<PathBuf> = Vec::new();
        for item in self.input_path.read_dir()? {
            let item_path = item?.path();
            let is_csv = item_path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if item_path.is_file() && is_csv {
                file_list.push(item_path);
            }
        }
        file_list.sort();
        Ok(file_list)
    }
}
