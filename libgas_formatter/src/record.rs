use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::config::{ConcentrationSource, Config, EmptySelectionPolicy};
use super::error::{ConfigError, EmptySelection};
use super::flow::{mean_concentration, FlowRatio};
use super::metadata::Metadata;
use super::relay::ChannelSeries;
use super::segmenter::{CycleWindow, Segmentation, StepWindows};

/// Readings of one phase. `Empty` marks a phase filter that selected no rows.
///
/// Unreadable cells are NaN. JSON has no NaN, so they are written as `null` and read back as NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Option<f64>>", into = "Vec<f64>")]
pub enum Readings {
    Values(Vec<f64>),
    Empty,
}

impl From<Vec<f64>> for Readings {
    fn from(values: Vec<f64>) -> Self {
        if values.is_empty() {
            Readings::Empty
        } else {
            Readings::Values(values)
        }
    }
}

impl From<Vec<Option<f64>>> for Readings {
    fn from(values: Vec<Option<f64>>) -> Self {
        values
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect::<Vec<f64>>()
            .into()
    }
}

impl From<Readings> for Vec<f64> {
    fn from(readings: Readings) -> Self {
        match readings {
            Readings::Values(values) => values,
            Readings::Empty => vec![],
        }
    }
}

impl Readings {
    pub fn as_slice(&self) -> &[f64] {
        match self {
            Readings::Values(values) => values,
            Readings::Empty => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Readings::Empty)
    }

    /// Replace an empty selection by the legacy single zero value
    pub fn with_zero_placeholder(self) -> Self {
        match self {
            Readings::Empty => Readings::Values(vec![0.0]),
            values => values,
        }
    }
}

/// One exposure step of one sensor, ready for the sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub filename: String,
    pub source: String,
    pub analytes: Vec<String>,
    pub materials: Vec<String>,
    pub ppm: f64,
    pub timestep: f64,
    pub date: String,
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<String>,
    #[serde(rename = "ON")]
    pub on: Readings,
    #[serde(rename = "OFF")]
    pub off: Readings,
    #[serde(rename = "Baseline", default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Readings>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "features_with_nan"
    )]
    pub features: Option<BTreeMap<String, f64>>,
}

/// Feature maps written with NaN values come back with `null` in their place
fn features_with_nan<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let features = Option::<BTreeMap<String, Option<f64>>>::deserialize(deserializer)?;
    Ok(features.map(|map| {
        map.into_iter()
            .map(|(name, value)| (name, value.unwrap_or(f64::NAN)))
            .collect()
    }))
}

/// Concentration text for file names: whole values without decimals, others to two places
pub fn format_ppm(ppm: f64) -> String {
    if ppm.fract() == 0.0 {
        format!("{ppm:.0}")
    } else {
        format!("{ppm:.2}")
    }
}

/// `<date>_<material>_<analyte>_<ppm>ppm_cycle<step>[_<sensor>]`
pub fn record_file_name(
    metadata: &Metadata,
    ppm: f64,
    step: u32,
    sensor: Option<&str>,
) -> String {
    let mut name = format!(
        "{}_{}_{}_{}ppm_cycle{}",
        metadata.date,
        metadata.primary_material(),
        metadata.primary_analyte(),
        format_ppm(ppm),
        step
    );
    if let Some(sensor) = sensor {
        name.push('_');
        name.push_str(sensor);
    }
    name
}

/// Merges file metadata and accepted windows into [`ExposureRecord`]s
#[derive(Debug, Clone)]
pub struct ExposureRecordBuilder {
    concentration_source: ConcentrationSource,
    empty_selection: EmptySelectionPolicy,
    include_baseline: bool,
    saturation_ppm: fxhash::FxHashMap<String, f64>,
}

impl ExposureRecordBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            concentration_source: config.concentration_source,
            empty_selection: config.empty_selection,
            include_baseline: config.include_baseline,
            saturation_ppm: config.saturation_ppm.clone(),
        }
    }

    /// Build one record per accepted step. Steps without a concentration are skipped and logged.
    pub fn build(
        &self,
        metadata: &Metadata,
        series: &ChannelSeries,
        segmentation: &Segmentation,
        flow: Option<&[Option<FlowRatio>]>,
    ) -> Result<Vec<ExposureRecord>, ConfigError> {
        let mut records = Vec::with_capacity(segmentation.steps.len());
        for step in &segmentation.steps {
            let Some(ppm) = self.concentration(metadata, series, step, flow)? else {
                log::warn!(
                    "No concentration for step {} of {}; step skipped",
                    step.step,
                    series.name
                );
                continue;
            };
            let sensor = metadata
                .sensor
                .clone()
                .unwrap_or_else(|| series.sensor.to_string());
            records.push(ExposureRecord {
                filename: record_file_name(metadata, ppm, step.step, Some(&sensor)),
                source: series.name.clone(),
                analytes: metadata.analytes.clone(),
                materials: metadata.materials.clone(),
                ppm,
                timestep: segmentation.avg_timestep,
                date: metadata.date.clone(),
                step: step.step,
                repeat: metadata.repeat,
                sensor: Some(sensor),
                on: self.readings(&series.name, &step.on, step.step),
                off: self.readings(&series.name, &step.off, step.step),
                baseline: self
                    .include_baseline
                    .then(|| self.readings(&series.name, &step.baseline, step.step)),
                features: None,
            });
        }
        Ok(records)
    }

    fn concentration(
        &self,
        metadata: &Metadata,
        series: &ChannelSeries,
        step: &StepWindows,
        flow: Option<&[Option<FlowRatio>]>,
    ) -> Result<Option<f64>, ConfigError> {
        match self.concentration_source {
            ConcentrationSource::Filename => {
                let values = &metadata.concentrations;
                // A single value covers every step; otherwise step k takes the k-th value
                let value = if values.len() == 1 {
                    values.first()
                } else {
                    (step.step as usize)
                        .checked_sub(1)
                        .and_then(|idx| values.get(idx))
                };
                Ok(value.map(|v| *v as f64))
            }
            ConcentrationSource::FlowRatio => {
                let analyte = metadata.primary_analyte();
                let saturation = *self
                    .saturation_ppm
                    .get(analyte)
                    .ok_or_else(|| ConfigError::MissingSaturationPpm(analyte.to_string()))?;
                Ok(mean_concentration(flow, &step.on.rows, saturation, &series.name))
            }
        }
    }

    fn readings(&self, series: &str, window: &CycleWindow, step: u32) -> Readings {
        let readings = Readings::from(window.readings.clone());
        if !readings.is_empty() {
            return readings;
        }
        log::warn!(
            "{}",
            EmptySelection {
                series: series.to_string(),
                step,
                phase: window.phase,
            }
        );
        match self.empty_selection {
            EmptySelectionPolicy::Marker => readings,
            EmptySelectionPolicy::ZeroPlaceholder => readings.with_zero_placeholder(),
        }
    }
}
