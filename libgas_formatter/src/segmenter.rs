//! Cycle segmentation of a per-sensor series.
//!
//! Rows are assigned to a [`Phase`] from their free-text label, optionally grouped by the
//! step number embedded in the label ("On2", "Off2", ...), and a step is accepted only
//! when its windows cover the minimum exposure duration.
use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::Config;
use super::error::{InsufficientData, TableError};
use super::relay::ChannelSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Baseline,
    On,
    Off,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Baseline => write!(f, "baseline"),
            Phase::On => write!(f, "on"),
            Phase::Off => write!(f, "off"),
        }
    }
}

impl Phase {
    /// Classify a label by case-insensitive substring.
    ///
    /// "pre" wins over "off", which wins over "on", so each label lands in at most one phase.
    pub fn classify(label: &str) -> Option<Self> {
        let label = label.to_ascii_lowercase();
        if label.contains("pre") {
            Some(Phase::Baseline)
        } else if label.contains("off") {
            Some(Phase::Off)
        } else if label.contains("on") {
            Some(Phase::On)
        } else {
            None
        }
    }
}

/// The first run of digits in a label, e.g. 2 for "On2"
pub fn step_of_label(label: &str) -> Option<u32> {
    let start = label.find(|c: char| c.is_ascii_digit())?;
    let digits: String = label[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Mean of the consecutive differences of `times`. None with fewer than two samples.
pub fn average_timestep(times: &[f64]) -> Option<f64> {
    if times.len() < 2 {
        return None;
    }
    let total: f64 = times.windows(2).map(|w| w[1] - w[0]).sum();
    Some(total / (times.len() - 1) as f64)
}

/// Rows needed to cover `duration_seconds` at the given timestep
pub fn minimum_rows(duration_seconds: f64, avg_timestep: f64) -> usize {
    if duration_seconds <= 0.0 {
        return 0;
    }
    (duration_seconds / avg_timestep).ceil() as usize
}

/// Indices of the tagged rows accepted by `pred`
fn rows_where<F>(tagged: &[(Option<Phase>, Option<u32>)], pred: F) -> Vec<usize>
where
    F: Fn(Option<Phase>, Option<u32>) -> bool,
{
    tagged
        .iter()
        .enumerate()
        .filter(|(_, (phase, step))| pred(*phase, *step))
        .map(|(idx, _)| idx)
        .collect()
}

/// One phase of one step: the readings and the rows they came from
#[derive(Debug, Clone, PartialEq)]
pub struct CycleWindow {
    pub phase: Phase,
    pub step: Option<u32>,
    pub rows: Vec<usize>,
    pub readings: Vec<f64>,
}

impl CycleWindow {
    fn collect(series: &ChannelSeries, phase: Phase, step: Option<u32>, rows: Vec<usize>) -> Self {
        let readings = rows.iter().map(|&r| series.values[r]).collect();
        Self {
            phase,
            step,
            rows,
            readings,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The baseline, on and off windows of one accepted step
#[derive(Debug, Clone, PartialEq)]
pub struct StepWindows {
    /// 1-based step (or repeat) number
    pub step: u32,
    pub baseline: CycleWindow,
    pub on: CycleWindow,
    pub off: CycleWindow,
}

/// Which steps to cut out of a series
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepPlan {
    /// Every row belongs to the single step given
    Whole { step: u32 },
    /// Rows are grouped by the step number in their label
    Indexed(Vec<u32>),
}

/// The outcome of segmenting one series
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    pub avg_timestep: f64,
    pub min_rows: usize,
    pub steps: Vec<StepWindows>,
    pub rejected: Vec<InsufficientData>,
}

/// Splits series into exposure windows under a fixed duration policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleSegmenter {
    min_exposure_seconds: f64,
    require_baseline: bool,
}

impl CycleSegmenter {
    pub fn new(min_exposure_seconds: f64, require_baseline: bool) -> Self {
        Self {
            min_exposure_seconds,
            require_baseline,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.min_exposure_seconds, config.require_baseline)
    }

    /// The distinct label step numbers of on-phase rows, ascending
    pub fn on_steps(series: &ChannelSeries) -> Vec<u32> {
        let mut steps: Vec<u32> = series
            .labels
            .iter()
            .filter(|label| Phase::classify(label) == Some(Phase::On))
            .filter_map(|label| step_of_label(label))
            .collect();
        steps.sort_unstable();
        steps.dedup();
        steps
    }

    pub fn segment(
        &self,
        series: &ChannelSeries,
        plan: &StepPlan,
    ) -> Result<Segmentation, TableError> {
        let avg_timestep =
            average_timestep(&series.times).ok_or(TableError::TooFewRows(series.times.len()))?;
        let min_rows = minimum_rows(self.min_exposure_seconds, avg_timestep);

        let tagged: Vec<(Option<Phase>, Option<u32>)> = series
            .labels
            .iter()
            .map(|label| (Phase::classify(label), step_of_label(label)))
            .collect();

        let mut candidates: Vec<StepWindows> = Vec::new();
        match plan {
            StepPlan::Whole { step } => {
                let window = |phase: Phase| {
                    let rows = rows_where(&tagged, |p, _| p == Some(phase));
                    CycleWindow::collect(series, phase, Some(*step), rows)
                };
                candidates.push(StepWindows {
                    step: *step,
                    baseline: window(Phase::Baseline),
                    on: window(Phase::On),
                    off: window(Phase::Off),
                });
            }
            StepPlan::Indexed(steps) => {
                // Baseline rows are usually labeled without a step and shared by every step
                let baseline_indexed = tagged
                    .iter()
                    .any(|(phase, step)| *phase == Some(Phase::Baseline) && step.is_some());
                for &step in steps {
                    let window = |phase: Phase| {
                        CycleWindow::collect(
                            series,
                            phase,
                            Some(step),
                            rows_where(&tagged, |p, s| p == Some(phase) && s == Some(step)),
                        )
                    };
                    let baseline = if baseline_indexed {
                        window(Phase::Baseline)
                    } else {
                        CycleWindow::collect(
                            series,
                            Phase::Baseline,
                            None,
                            rows_where(&tagged, |p, _| p == Some(Phase::Baseline)),
                        )
                    };
                    candidates.push(StepWindows {
                        step,
                        baseline,
                        on: window(Phase::On),
                        off: window(Phase::Off),
                    });
                }
            }
        }

        let mut steps = Vec::new();
        let mut rejected = Vec::new();
        for candidate in candidates {
            match self.check(&candidate, min_rows) {
                Some(short) => rejected.push(short),
                None => steps.push(candidate),
            }
        }

        Ok(Segmentation {
            avg_timestep,
            min_rows,
            steps,
            rejected,
        })
    }

    /// Return the first window of the step that is too short, if any
    fn check(&self, step: &StepWindows, min_rows: usize) -> Option<InsufficientData> {
        let mut windows = vec![&step.on, &step.off];
        if self.require_baseline {
            windows.push(&step.baseline);
        }
        windows
            .into_iter()
            .find(|w| w.len() < min_rows)
            .map(|w| InsufficientData {
                step: step.step,
                phase: w.phase,
                rows: w.len(),
                required: min_rows,
            })
    }
}
