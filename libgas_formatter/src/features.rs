use std::collections::BTreeMap;

use super::record::ExposureRecord;

/// Computes a fixed, named set of scalar features from the on and off readings of a step
pub trait FeatureExtractor {
    /// Names of the features returned by [`FeatureExtractor::extract`]
    fn names(&self) -> Vec<String>;

    fn extract(&self, on: &[f64], off: &[f64]) -> BTreeMap<String, f64>;

    /// Attach features to a record. Records with an empty phase are left untouched.
    fn attach(&self, record: &mut ExposureRecord) {
        if record.on.is_empty() || record.off.is_empty() {
            log::warn!("No features for {}: a phase is empty", record.filename);
            return;
        }
        record.features = Some(self.extract(record.on.as_slice(), record.off.as_slice()));
    }
}

/// Basic statistics of each phase plus the relative response between them
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryFeatures;

const STATISTICS: [&str; 5] = ["mean", "std", "min", "max", "median"];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Summary {
    mean: f64,
    std: f64,
    min: f64,
    max: f64,
    median: f64,
}

impl Summary {
    /// Summary of the finite values; NaN everywhere when there are none
    fn of(values: &[f64]) -> Self {
        let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Self {
                mean: f64::NAN,
                std: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
                median: f64::NAN,
            };
        }
        finite.sort_by(f64::total_cmp);
        let n = finite.len() as f64;
        let mean = finite.iter().sum::<f64>() / n;
        let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let mid = finite.len() / 2;
        let median = if finite.len() % 2 == 0 {
            (finite[mid - 1] + finite[mid]) / 2.0
        } else {
            finite[mid]
        };
        Self {
            mean,
            std: variance.sqrt(),
            min: finite[0],
            max: finite[finite.len() - 1],
            median,
        }
    }

    fn values(&self) -> [f64; 5] {
        [self.mean, self.std, self.min, self.max, self.median]
    }
}

impl FeatureExtractor for SummaryFeatures {
    fn names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(2 * STATISTICS.len() + 1);
        for phase in ["on", "off"] {
            for stat in STATISTICS {
                names.push(format!("{phase}_{stat}"));
            }
        }
        names.push(String::from("relative_response"));
        names
    }

    fn extract(&self, on: &[f64], off: &[f64]) -> BTreeMap<String, f64> {
        let on = Summary::of(on);
        let off = Summary::of(off);
        let mut features = BTreeMap::new();
        for (phase, summary) in [("on", on), ("off", off)] {
            for (stat, value) in STATISTICS.iter().zip(summary.values()) {
                features.insert(format!("{phase}_{stat}"), value);
            }
        }
        // (R_on - R_off) / R_off, undefined for a zero off mean
        let relative = if off.mean == 0.0 {
            f64::NAN
        } else {
            (on.mean - off.mean) / off.mean
        };
        features.insert(String::from("relative_response"), relative);
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Readings;

    #[test]
    fn test_summary_statistics() {
        let on = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let features = SummaryFeatures.extract(&on, &[1.0, 3.0, 2.0]);
        assert_eq!(features["on_mean"], 5.0);
        assert_eq!(features["on_std"], 2.0);
        assert_eq!(features["on_median"], 4.5);
        assert_eq!(features["off_min"], 1.0);
        assert_eq!(features["off_max"], 3.0);
        assert_eq!(features["off_median"], 2.0);
        assert_eq!(features["relative_response"], 1.5);
    }

    #[test]
    fn test_names_match_keys() {
        let features = SummaryFeatures.extract(&[1.0], &[1.0]);
        let mut names = SummaryFeatures.names();
        names.sort();
        let keys: Vec<String> = features.keys().cloned().collect();
        assert_eq!(keys, names);
    }

    #[test]
    fn test_nan_ignored() {
        let features = SummaryFeatures.extract(&[f64::NAN, 3.0], &[]);
        assert_eq!(features["on_mean"], 3.0);
        assert!(features["off_mean"].is_nan());
        assert!(features["relative_response"].is_nan());
    }

    #[test]
    fn test_attach_skips_empty_phase() {
        let mut record = ExposureRecord {
            filename: String::from("rec"),
            source: String::from("src"),
            analytes: vec![String::from("IPA")],
            materials: vec![String::from("ZnO")],
            ppm: 10.0,
            timestep: 1.0,
            date: String::from("20241105"),
            step: 1,
            repeat: None,
            sensor: None,
            on: Readings::Values(vec![2.0]),
            off: Readings::Empty,
            baseline: None,
            features: None,
        };
        SummaryFeatures.attach(&mut record);
        assert!(record.features.is_none());
        record.off = Readings::Values(vec![1.0]);
        SummaryFeatures.attach(&mut record);
        assert_eq!(record.features.unwrap()["relative_response"], 1.0);
    }
}
