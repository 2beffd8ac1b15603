use regex::Regex;
use std::fmt;

use super::config::{Config, Rig};
use super::error::{ConfigError, ProcessorError, TableError};
use super::metadata::extract_sensor;
use super::raw_log::{relay_column, RawLog, CURRENT_COLUMN, RESISTANCE_COLUMN};

/// Sensor label plus the relay it was wired to, displayed as `<label>.<relay>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SensorName {
    pub label: String,
    pub relay: Option<u8>,
}

impl SensorName {
    pub fn new(label: &str, relay: Option<u8>) -> Self {
        Self {
            label: label.to_string(),
            relay,
        }
    }
}

impl fmt::Display for SensorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.relay {
            Some(relay) => write!(f, "{}.{}", self.label, relay),
            None => write!(f, "{}", self.label),
        }
    }
}

/// A narrow per-sensor time series (Time, Resistance, Cycle) cut from a wide log
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSeries {
    /// `<source stem>_<sensor>`; the name downstream metadata is read from
    pub name: String,
    pub sensor: SensorName,
    pub times: Vec<f64>,
    pub values: Vec<f64>,
    pub labels: Vec<String>,
}

impl ChannelSeries {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Write the series as a Time,Resistance,Cycle CSV
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(["Time", "Resistance", "Cycle"])?;
        for ((time, value), label) in self.times.iter().zip(&self.values).zip(&self.labels) {
            writer.write_record([time.to_string(), value.to_string(), label.clone()])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Pick the sensor label: the pattern match in the file name, else the supplied label
pub fn resolve_sensor_label(
    file_name: &str,
    pattern: &Regex,
    supplied: Option<&str>,
) -> Option<String> {
    pattern
        .find(file_name)
        .map(|m| m.as_str().to_string())
        .or_else(|| supplied.map(str::to_string))
}

/// Number of distinct finite values in a column
fn distinct_values(values: &[f64]) -> usize {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    finite.sort_by(f64::total_cmp);
    finite.dedup();
    finite.len()
}

/// Splits a wide multi-relay log into one [`ChannelSeries`] per active sensor
#[derive(Debug, Clone)]
pub struct RelayDemultiplexer {
    max_relays: u8,
    discard_relays: Vec<u8>,
    sensor_pattern: Regex,
    sensor_label: Option<String>,
    rig: Rig,
}

impl RelayDemultiplexer {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            max_relays: config.max_relays,
            discard_relays: config.discard_relays.clone(),
            sensor_pattern: config.sensor_regex()?,
            sensor_label: config.sensor_label.clone(),
            rig: config.rig,
        })
    }

    /// Override the externally supplied sensor label
    pub fn with_sensor_label(mut self, label: Option<String>) -> Self {
        if label.is_some() {
            self.sensor_label = label;
        }
        self
    }

    /// Relay numbers (1-based) whose column is present and not constant
    pub fn active_relays(&self, log: &RawLog) -> Result<Vec<u8>, TableError> {
        let mut relays = Vec::new();
        for relay in 1..=self.max_relays {
            let column = relay_column(relay);
            if !log.has_column(&column) {
                continue;
            }
            if self.discard_relays.contains(&relay) {
                log::info!("Relay {} of {} is discarded by configuration", relay, log.source_stem());
                continue;
            }
            if distinct_values(&log.numeric_column(&column)?) > 1 {
                relays.push(relay);
            }
        }
        Ok(relays)
    }

    /// A log with a `Resistance` column and no relay columns already holds a single sensor
    pub fn is_single_sensor(&self, log: &RawLog) -> bool {
        log.has_column(RESISTANCE_COLUMN)
            && !(1..=self.max_relays).any(|relay| log.has_column(&relay_column(relay)))
    }

    /// Split the log. A log with no active channel yields an empty list.
    pub fn split(&self, log: &RawLog) -> Result<Vec<ChannelSeries>, ProcessorError> {
        match self.rig {
            Rig::RelayResistance if self.is_single_sensor(log) => {
                Ok(vec![self.single_sensor_series(log)?])
            }
            Rig::RelayResistance => self.split_relays(log),
            Rig::FlowCurrent => Ok(vec![self.current_series(log)?]),
        }
    }

    fn sensor_label(&self, log: &RawLog) -> Result<String, ConfigError> {
        let stem = log.source_stem();
        resolve_sensor_label(&stem, &self.sensor_pattern, self.sensor_label.as_deref())
            .ok_or(ConfigError::MissingSensorLabel(stem))
    }

    fn split_relays(&self, log: &RawLog) -> Result<Vec<ChannelSeries>, ProcessorError> {
        let relays = self.active_relays(log)?;
        if relays.is_empty() {
            log::warn!("No active relays found in {}", log.source().display());
            return Ok(vec![]);
        }
        let label = self.sensor_label(log)?;
        let times = log.times()?;
        let labels = log.labels()?.to_vec();
        let stem = log.source_stem();

        let mut series = Vec::with_capacity(relays.len());
        for relay in relays {
            let sensor = SensorName::new(&label, Some(relay));
            series.push(ChannelSeries {
                name: format!("{stem}_{sensor}"),
                sensor,
                times: times.clone(),
                values: log.numeric_column(&relay_column(relay))?,
                labels: labels.clone(),
            });
        }
        log::info!(
            "Found {} active relays in {}",
            series.len(),
            log.source().display()
        );
        Ok(series)
    }

    /// The whole log as one series, named after the file. The file name carries the sensor,
    /// relay suffix included, as written by [`ChannelSeries::write_csv`].
    fn single_sensor_series(&self, log: &RawLog) -> Result<ChannelSeries, ProcessorError> {
        let stem = log.source_stem();
        let label = extract_sensor(&stem, &self.sensor_pattern)
            .or_else(|| self.sensor_label.clone())
            .ok_or_else(|| ConfigError::MissingSensorLabel(stem.clone()))?;
        Ok(ChannelSeries {
            sensor: SensorName::new(&label, None),
            times: log.times()?,
            values: log.numeric_column(RESISTANCE_COLUMN)?,
            labels: log.labels()?.to_vec(),
            name: stem,
        })
    }

    fn current_series(&self, log: &RawLog) -> Result<ChannelSeries, ProcessorError> {
        let sensor = SensorName::new(&self.sensor_label(log)?, None);
        Ok(ChannelSeries {
            name: format!("{}_{}", log.source_stem(), sensor),
            sensor,
            times: log.times()?,
            values: log.numeric_column(CURRENT_COLUMN)?,
            labels: log.labels()?.to_vec(),
        })
    }
}
