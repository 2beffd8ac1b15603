//! Splitting of repeat-protocol logs.
//!
//! A repeat log runs the same exposure several times, labeling rows
//! `Run-On Cycle (Repeat N)` and `Off Cycle (Repeat N)`. Each repeat that has both on and
//! off rows becomes its own sub-log, which is then processed like any single-step log.
//! A repeat whose on rows do not all come before its off rows is dropped, since its
//! sub-log would not have an increasing time axis.
use regex::Regex;
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::config::Config;
use super::error::{ConfigError, RepeatSplitError};
use super::metadata::{extract_date, extract_repeat};
use super::raw_log::RawLog;

/// One repeat cut out of a repeat log: its on rows followed by its off rows
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatLog {
    pub repeat: u32,
    /// `<date>_<base file name>_rep=<repeat>`
    pub name: String,
    pub log: RawLog,
}

/// Indices and repeat numbers of the labels matching `pattern`
fn tag_repeats(labels: &[String], pattern: &Regex) -> Vec<(usize, u32)> {
    labels
        .iter()
        .enumerate()
        .filter_map(|(row, label)| {
            let cap = pattern.captures(label)?;
            let repeat = cap.get(1)?.as_str().parse::<u32>().ok()?;
            Some((row, repeat))
        })
        .collect()
}

fn rows_of(tagged: &[(usize, u32)], repeat: u32) -> impl Iterator<Item = usize> + '_ {
    tagged
        .iter()
        .filter(move |(_, r)| *r == repeat)
        .map(|(row, _)| *row)
}

/// The on rows of `repeat` all precede its off rows
fn is_ordered(on: &[(usize, u32)], off: &[(usize, u32)], repeat: u32) -> bool {
    match (rows_of(on, repeat).max(), rows_of(off, repeat).min()) {
        (Some(last_on), Some(first_off)) => last_on < first_off,
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct RepeatSplitter {
    on_pattern: Regex,
    off_pattern: Regex,
    repeat_count: Option<u32>,
}

impl RepeatSplitter {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            on_pattern: config.repeat_on_regex()?,
            off_pattern: config.repeat_off_regex()?,
            repeat_count: config.repeat_count,
        })
    }

    /// Split a repeat log into one sub-log per repeat found in both the on and off rows,
    /// in ascending repeat order.
    pub fn split(&self, log: &RawLog) -> Result<Vec<RepeatLog>, RepeatSplitError> {
        let labels = log.labels()?;
        let base = log.source_stem();
        let date = extract_date(&base).map_err(|_| ConfigError::MissingDate(base.clone()))?;
        let expected = match self.repeat_count {
            Some(count) => count,
            None => extract_repeat(&base)
                .map_err(|_| ConfigError::MissingRepeatCount(base.clone()))?,
        };

        let on = tag_repeats(labels, &self.on_pattern);
        let off = tag_repeats(labels, &self.off_pattern);
        let on_repeats: BTreeSet<u32> = on.iter().map(|(_, r)| *r).collect();
        let off_repeats: BTreeSet<u32> = off.iter().map(|(_, r)| *r).collect();
        let repeats: Vec<u32> = on_repeats
            .intersection(&off_repeats)
            .copied()
            .filter(|repeat| {
                let ordered = is_ordered(&on, &off, *repeat);
                if !ordered {
                    log::warn!(
                        "{}: repeat {} has off rows before its last on row, dropping it",
                        base,
                        repeat
                    );
                }
                ordered
            })
            .collect();

        if repeats.is_empty() {
            return Err(RepeatSplitError::NoMatchingRepeats);
        }
        if repeats.len() != expected as usize {
            log::warn!(
                "{} declares {} repeats but {} have both on and off cycles",
                base,
                expected,
                repeats.len()
            );
        }

        let parent = log
            .source()
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        let mut logs = Vec::with_capacity(repeats.len());
        for repeat in repeats {
            let rows: Vec<usize> = rows_of(&on, repeat).chain(rows_of(&off, repeat)).collect();
            let name = format!("{date}_{base}_rep={repeat}");
            let source: PathBuf = parent.join(format!("{name}.csv"));
            logs.push(RepeatLog {
                repeat,
                log: log.select_rows(&rows, &source),
                name,
            });
        }
        log::info!("Split {} into {} repeats", base, logs.len());
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableError;
    use crate::raw_log::tests::log_from_str;

    fn splitter(config: Config) -> RepeatSplitter {
        RepeatSplitter::new(&config).unwrap()
    }

    const REPEATS: &str = "Time,Relay 1 Resistance,Cycle\n\
                           0,10,Pre\n\
                           1,11,Run-On Cycle (Repeat 1)\n\
                           2,12,Run-On Cycle (Repeat 2)\n\
                           3,13,Off Cycle (Repeat 2)\n\
                           4,14,run-on cycle (repeat 3)\n\
                           5,15,Run-On Cycle (Repeat 3)\n\
                           6,16,Off Cycle (Repeat 3)\n\
                           7,17,Off Cycle (Repeat 4)\n";

    #[test]
    fn test_only_paired_repeats_emitted() {
        let log = log_from_str("20241105_PN1_ZnO_IPA_rep=3.csv", REPEATS);
        let repeats = splitter(Config::default()).split(&log).unwrap();
        let found: Vec<u32> = repeats.iter().map(|r| r.repeat).collect();
        assert_eq!(found, vec![2, 3]);
        assert_eq!(repeats[0].name, "20241105_20241105_PN1_ZnO_IPA_rep=3_rep=2");
        assert_eq!(
            repeats[0].log.labels().unwrap(),
            &["Run-On Cycle (Repeat 2)", "Off Cycle (Repeat 2)"]
        );
        assert_eq!(
            repeats[1].log.numeric_column("Relay 1 Resistance").unwrap(),
            vec![14.0, 15.0, 16.0]
        );
        assert_eq!(
            repeats[1].log.source_stem(),
            "20241105_20241105_PN1_ZnO_IPA_rep=3_rep=3"
        );
    }

    #[test]
    fn test_interleaved_repeat_dropped() {
        let text = "Time,Relay 1 Resistance,Cycle\n\
                    0,10,Run-On Cycle (Repeat 1)\n\
                    1,11,Off Cycle (Repeat 1)\n\
                    2,12,Run-On Cycle (Repeat 2)\n\
                    3,13,Off Cycle (Repeat 2)\n\
                    4,14,Run-On Cycle (Repeat 2)\n\
                    5,15,Off Cycle (Repeat 2)\n";
        let log = log_from_str("20241105_PN1_ZnO_IPA_rep=2.csv", text);
        let repeats = splitter(Config::default()).split(&log).unwrap();
        assert_eq!(repeats.len(), 1);
        assert_eq!(repeats[0].repeat, 1);
        let times = repeats[0].log.numeric_column("Time").unwrap();
        assert!(times.windows(2).all(|w| w[0] < w[1]));

        let only_interleaved = log_from_str(
            "20241105_rep=1.csv",
            "Time,Cycle\n0,Off Cycle (Repeat 1)\n1,Run-On Cycle (Repeat 1)\n",
        );
        assert!(matches!(
            splitter(Config::default()).split(&only_interleaved),
            Err(RepeatSplitError::NoMatchingRepeats)
        ));
    }

    #[test]
    fn test_configured_repeat_count() {
        let log = log_from_str("20241105_PN1_ZnO_IPA.csv", REPEATS);
        assert!(matches!(
            splitter(Config::default()).split(&log),
            Err(RepeatSplitError::ConfigError(ConfigError::MissingRepeatCount(_)))
        ));
        let configured = splitter(Config {
            repeat_count: Some(2),
            ..Default::default()
        });
        assert_eq!(configured.split(&log).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_date() {
        let log = log_from_str("PN1_ZnO_IPA_rep=3.csv", REPEATS);
        assert!(matches!(
            splitter(Config::default()).split(&log),
            Err(RepeatSplitError::ConfigError(ConfigError::MissingDate(_)))
        ));
    }

    #[test]
    fn test_no_matching_repeats() {
        let log = log_from_str(
            "20241105_rep=1.csv",
            "Time,Cycle\n0,Run-On Cycle (Repeat 1)\n1,Off Cycle (Repeat 2)\n",
        );
        assert!(matches!(
            splitter(Config::default()).split(&log),
            Err(RepeatSplitError::NoMatchingRepeats)
        ));
    }

    #[test]
    fn test_missing_label_column() {
        let log = log_from_str("20241105_rep=1.csv", "Time,Value\n0,1\n");
        assert!(matches!(
            splitter(Config::default()).split(&log),
            Err(RepeatSplitError::TableError(TableError::MissingColumn(_)))
        ));
    }
}
