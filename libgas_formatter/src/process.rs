use std::path::Path;
use std::sync::mpsc::Sender;

use super::batch_status::{BatchStatus, BatchSummary, FileReport, Stage};
use super::config::{ConcentrationSource, Config, ProcessingMode};
use super::error::{FileError, ProcessorError};
use super::features::{FeatureExtractor, SummaryFeatures};
use super::flow::flow_ratios;
use super::metadata::MetadataExtractor;
use super::raw_log::RawLog;
use super::record::ExposureRecordBuilder;
use super::relay::{ChannelSeries, RelayDemultiplexer};
use super::repeat_splitter::RepeatSplitter;
use super::segmenter::{CycleSegmenter, StepPlan};
use super::sink::{CsvSink, JsonSink, OutputLock, RecordSink, TableSink};

/// Tag an error with the stage it came from
trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, FileError>;
}

impl<T, E: Into<ProcessorError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, FileError> {
        self.map_err(|e| FileError {
            stage,
            source: e.into(),
        })
    }
}

/// Steps of a series that is not a repeat: one per indexed on label, or the whole series
/// when the labels carry no step numbers
fn cascade_plan(series: &ChannelSeries) -> StepPlan {
    let steps = CycleSegmenter::on_steps(series);
    if steps.is_empty() {
        StepPlan::Whole { step: 1 }
    } else {
        StepPlan::Indexed(steps)
    }
}

/// The per-file pipeline: every component built once from the config, plus the sinks
pub struct Processor {
    mode: ProcessingMode,
    concentration_source: ConcentrationSource,
    extractor: MetadataExtractor,
    demux: RelayDemultiplexer,
    segmenter: CycleSegmenter,
    builder: ExposureRecordBuilder,
    splitter: RepeatSplitter,
    features: Option<Box<dyn FeatureExtractor>>,
    series_sink: Option<CsvSink>,
    repeat_sink: Option<CsvSink>,
    record_sinks: Vec<Box<dyn RecordSink>>,
}

impl Processor {
    pub fn new(config: &Config, sensor_label: Option<String>) -> Result<Self, ProcessorError> {
        let mut record_sinks: Vec<Box<dyn RecordSink>> = Vec::new();
        if let Some(dir) = &config.json_path {
            record_sinks.push(Box::new(JsonSink::new(dir)?));
        }
        if let Some(path) = &config.table_path {
            record_sinks.push(Box::new(TableSink::new(path)?));
        }
        let features: Option<Box<dyn FeatureExtractor>> = if config.extract_features {
            Some(Box::new(SummaryFeatures))
        } else {
            None
        };
        Ok(Self {
            mode: config.mode,
            concentration_source: config.concentration_source,
            extractor: MetadataExtractor::new(config)?,
            demux: RelayDemultiplexer::new(config)?.with_sensor_label(sensor_label),
            segmenter: CycleSegmenter::from_config(config),
            builder: ExposureRecordBuilder::new(config),
            splitter: RepeatSplitter::new(config)?,
            features,
            series_sink: config.relay_data_path.as_deref().map(CsvSink::new).transpose()?,
            repeat_sink: config.repeat_data_path.as_deref().map(CsvSink::new).transpose()?,
            record_sinks,
        })
    }

    /// Run one input log through the whole pipeline
    pub fn process_file(&mut self, path: &Path) -> Result<FileReport, FileError> {
        let log = RawLog::from_path(path).at(Stage::Read)?;
        let mut report = FileReport {
            path: path.to_path_buf(),
            ..Default::default()
        };
        match self.mode {
            ProcessingMode::Cascade => self.process_log(&log, None, &mut report)?,
            ProcessingMode::Repeat => {
                let repeats = self.splitter.split(&log).at(Stage::RepeatSplit)?;
                for repeat in repeats {
                    if let Some(sink) = &self.repeat_sink {
                        sink.write_repeat(&repeat).at(Stage::Write)?;
                    }
                    self.process_log(&repeat.log, Some(repeat.repeat), &mut report)?;
                }
            }
        }
        Ok(report)
    }

    fn process_log(
        &mut self,
        log: &RawLog,
        repeat: Option<u32>,
        report: &mut FileReport,
    ) -> Result<(), FileError> {
        // Fail on a bad file name before any output is written
        let file_metadata = self
            .extractor
            .extract(&log.source_stem())
            .at(Stage::Metadata)?;
        if report.analytes.is_empty() {
            report.analytes = file_metadata.analytes;
            report.materials = file_metadata.materials;
        }

        let all_series = self.demux.split(log).at(Stage::Demultiplex)?;
        let flow = match self.concentration_source {
            ConcentrationSource::FlowRatio => flow_ratios(log),
            ConcentrationSource::Filename => None,
        };

        for series in all_series {
            if let Some(sink) = &self.series_sink {
                sink.write_series(&series).at(Stage::Write)?;
            }
            let metadata = self.extractor.extract(&series.name).at(Stage::Metadata)?;
            let plan = match repeat {
                Some(step) => StepPlan::Whole { step },
                None => cascade_plan(&series),
            };
            let segmentation = self.segmenter.segment(&series, &plan).at(Stage::Segment)?;
            for dropped in &segmentation.rejected {
                log::warn!("{}: {}", series.name, dropped);
            }
            report.dropped_steps += segmentation.rejected.len();

            let records = self
                .builder
                .build(&metadata, &series, &segmentation, flow.as_deref())
                .at(Stage::Build)?;
            for mut record in records {
                if let Some(features) = &self.features {
                    features.attach(&mut record);
                }
                for sink in self.record_sinks.iter_mut() {
                    sink.write(&record).at(Stage::Write)?;
                }
                report.records += 1;
            }
            report.series += 1;
        }
        Ok(())
    }
}

/// The main loop of gas_formatter.
///
/// Validates the config, locks and then optionally clears the output directories, and runs
/// every input file through a [`Processor`]. A failing file is logged with its stage and
/// recorded in the summary; it never stops the batch.
pub fn process_batch(
    config: &Config,
    sensor_label: Option<String>,
    clear: bool,
    tx: &Sender<BatchStatus>,
) -> Result<BatchSummary, ProcessorError> {
    config.validate()?;
    let files = config.get_input_files()?;
    log::info!(
        "Found {} input files in {}",
        files.len(),
        config.input_path.display()
    );

    let locks = config
        .output_directories()
        .into_iter()
        .map(OutputLock::acquire)
        .collect::<Result<Vec<OutputLock>, _>>()?;
    if clear {
        for lock in &locks {
            lock.clear()?;
        }
    }

    let mut processor = Processor::new(config, sensor_label)?;
    let mut summary = BatchSummary::default();
    for (idx, path) in files.iter().enumerate() {
        log::info!("Processing {}...", path.display());
        match processor.process_file(path) {
            Ok(report) => {
                log::info!(
                    "Finished {}: {} series, {} records",
                    path.display(),
                    report.series,
                    report.records
                );
                summary.record_success(report);
            }
            Err(e) => {
                log::error!("Skipping {}: {e}", path.display());
                summary.record_skip(path.clone(), e.stage, e.source.to_string());
            }
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        tx.send(BatchStatus::new(idx, files.len(), name))?;
    }
    summary.log();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetadataError;
    use std::path::PathBuf;
    use std::sync::mpsc;

    /// Three concentration steps at one sample per second; step 2 is too short
    fn cascade_log() -> String {
        let mut text =
            String::from("Elapsed Time (s),Relay 1 Resistance,Relay 2 Resistance,Cycle\n");
        let runs = [
            ("Pre", 10),
            ("On1", 12),
            ("Off1", 12),
            ("On2", 8),
            ("Off2", 12),
            ("On3", 12),
            ("Off3", 12),
        ];
        let mut t = 0;
        for (label, count) in runs {
            for _ in 0..count {
                text.push_str(&format!("{t},{},5,{label}\n", 1000 + t));
                t += 1;
            }
        }
        text
    }

    fn config(input: &Path, out: &Path) -> Config {
        Config {
            input_path: input.to_path_buf(),
            relay_data_path: Some(out.join("relay_data")),
            json_path: Some(out.join("json")),
            table_path: Some(out.join("records.csv")),
            analytes: vec![String::from("H2")],
            materials: vec![String::from("CuOxSnOx")],
            ..Default::default()
        }
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = dir
            .read_dir()
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_cascade_batch() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(
            input.path().join("20241105_CuOxSnOx_H2_1250ppm_2500ppm_3750ppm_PN1.csv"),
            cascade_log(),
        )
        .unwrap();
        std::fs::write(input.path().join("20241105_unknown_H2_100ppm_PN1.csv"), cascade_log())
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let summary = process_batch(&config(input.path(), out.path()), None, false, &tx).unwrap();
        assert_eq!(rx.try_iter().count(), 2);

        assert_eq!(summary.processed.len(), 1);
        assert_eq!(summary.processed[0].records, 2);
        assert_eq!(summary.processed[0].dropped_steps, 1);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].stage, Stage::Metadata);

        assert_eq!(
            file_names(&out.path().join("json")),
            vec![
                "20241105_CuOxSnOx_H2_1250ppm_cycle1_PN1.1.json",
                "20241105_CuOxSnOx_H2_3750ppm_cycle3_PN1.1.json",
            ]
        );
        assert_eq!(
            file_names(&out.path().join("relay_data")),
            vec!["20241105_CuOxSnOx_H2_1250ppm_2500ppm_3750ppm_PN1_PN1.1.csv"]
        );
        let table = std::fs::read_to_string(out.path().join("records.csv")).unwrap();
        assert_eq!(table.lines().count(), 3);
        // No lock is left behind
        assert!(!out.path().join("json").join(crate::sink::LOCK_FILE_NAME).exists());
    }

    #[test]
    fn test_repeat_batch() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut text = String::from("Time,Relay 1 Resistance,Cycle\n");
        let mut t = 0;
        for repeat in 1..=2 {
            for label in ["Run-On Cycle", "Off Cycle"] {
                for _ in 0..10 {
                    text.push_str(&format!("{t},{},{label} (Repeat {repeat})\n", 50 + t));
                    t += 1;
                }
            }
        }
        let name = "20241105_CuOxSnOx_H2_500ppm_PN2_rep=2.csv";
        std::fs::write(input.path().join(name), text).unwrap();
        let config = Config {
            mode: ProcessingMode::Repeat,
            repeat_data_path: Some(out.path().join("repeat_data")),
            ..config(input.path(), out.path())
        };

        let (tx, _rx) = mpsc::channel();
        let summary = process_batch(&config, None, false, &tx).unwrap();
        assert_eq!(summary.processed[0].records, 2);
        assert_eq!(file_names(&out.path().join("repeat_data")).len(), 2);

        let json = file_names(&out.path().join("json"));
        assert_eq!(
            json,
            vec![
                "20241105_CuOxSnOx_H2_500ppm_cycle1_PN2.1.json",
                "20241105_CuOxSnOx_H2_500ppm_cycle2_PN2.1.json",
            ]
        );
        let text = std::fs::read_to_string(out.path().join("json").join(&json[1])).unwrap();
        let record: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(record["repeat"], 2);
        assert_eq!(record["ON"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn test_single_sensor_batch() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut text = String::from("Time,Resistance,Cycle\n");
        let mut t = 0;
        for label in ["Pre", "On1", "Off1"] {
            for _ in 0..12 {
                text.push_str(&format!("{t},{},{label}\n", 200 + t));
                t += 1;
            }
        }
        let name = "20241105_PN1_CuOxSnOx_H2_1250ppm_1_PN1.2.csv";
        std::fs::write(input.path().join(name), text).unwrap();

        let (tx, _rx) = mpsc::channel();
        let summary = process_batch(&config(input.path(), out.path()), None, false, &tx).unwrap();
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.processed[0].series, 1);
        assert_eq!(summary.processed[0].records, 1);
        assert_eq!(
            file_names(&out.path().join("json")),
            vec!["20241105_CuOxSnOx_H2_1250ppm_cycle1_PN1.2.json"]
        );
        assert_eq!(
            file_names(&out.path().join("relay_data")),
            vec!["20241105_PN1_CuOxSnOx_H2_1250ppm_1_PN1.2.csv"]
        );
    }

    #[test]
    fn test_clear_runs_under_lock() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(
            input.path().join("20241105_CuOxSnOx_H2_1250ppm_2500ppm_3750ppm_PN1.csv"),
            cascade_log(),
        )
        .unwrap();
        let json = out.path().join("json");
        std::fs::create_dir_all(&json).unwrap();
        std::fs::write(json.join("stale.json"), "{}").unwrap();

        let (tx, _rx) = mpsc::channel();
        process_batch(&config(input.path(), out.path()), None, true, &tx).unwrap();
        assert_eq!(
            file_names(&json),
            vec![
                "20241105_CuOxSnOx_H2_1250ppm_cycle1_PN1.1.json",
                "20241105_CuOxSnOx_H2_3750ppm_cycle3_PN1.1.json",
            ]
        );
    }

    #[test]
    fn test_locked_output_refused() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let config = config(input.path(), out.path());
        let relay_data = out.path().join("relay_data");
        std::fs::create_dir_all(&relay_data).unwrap();
        std::fs::write(relay_data.join("kept.csv"), "").unwrap();
        let _held = OutputLock::acquire(&out.path().join("json")).unwrap();

        let (tx, _rx) = mpsc::channel();
        assert!(matches!(
            process_batch(&config, None, true, &tx),
            Err(ProcessorError::SinkError(_))
        ));
        // Nothing is cleared unless every directory could be locked
        assert_eq!(file_names(&relay_data), vec!["kept.csv"]);
    }

    #[test]
    fn test_stage_tagging() {
        let result: Result<(), MetadataError> = Err(MetadataError::NotFound {
            field: "date",
            path: String::from("x"),
        });
        let error = result.at(Stage::Metadata).unwrap_err();
        assert_eq!(error.stage, Stage::Metadata);
        assert!(error.to_string().starts_with("metadata stage failed"));

        let no_output = Config {
            relay_data_path: None,
            json_path: None,
            ..Default::default()
        };
        let mut processor = Processor::new(&no_output, None).unwrap();
        let missing = processor.process_file(&PathBuf::from("/does/not/exist.csv"));
        assert_eq!(missing.unwrap_err().stage, Stage::Read);
    }
}
