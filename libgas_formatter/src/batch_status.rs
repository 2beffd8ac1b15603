use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// The pipeline stage a file was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Read,
    RepeatSplit,
    Metadata,
    Demultiplex,
    Segment,
    Build,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Read => "read",
            Stage::RepeatSplit => "repeat split",
            Stage::Metadata => "metadata",
            Stage::Demultiplex => "demultiplex",
            Stage::Segment => "segment",
            Stage::Build => "build",
            Stage::Write => "write",
        };
        write!(f, "{name}")
    }
}

/// Progress message sent by the batch loop after each file
#[derive(Debug, Clone, Default)]
pub struct BatchStatus {
    pub progress: f32,
    pub file_index: usize,
    pub n_files: usize,
    pub file_name: String,
}

impl BatchStatus {
    pub fn new(file_index: usize, n_files: usize, file_name: String) -> Self {
        let progress = if n_files == 0 {
            1.0
        } else {
            (file_index + 1) as f32 / n_files as f32
        };
        Self {
            progress,
            file_index,
            n_files,
            file_name,
        }
    }
}

/// What one successfully processed input produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileReport {
    pub path: PathBuf,
    pub series: usize,
    pub records: usize,
    pub dropped_steps: usize,
    pub analytes: Vec<String>,
    pub materials: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub stage: Stage,
    pub reason: String,
}

/// Outcome of a batch. The analyte and material sets collect every token seen in the batch.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub processed: Vec<FileReport>,
    pub skipped: Vec<SkippedFile>,
    pub analytes: BTreeSet<String>,
    pub materials: BTreeSet<String>,
}

impl BatchSummary {
    pub fn record_success(&mut self, report: FileReport) {
        self.analytes.extend(report.analytes.iter().cloned());
        self.materials.extend(report.materials.iter().cloned());
        self.processed.push(report);
    }

    pub fn record_skip(&mut self, path: PathBuf, stage: Stage, reason: String) {
        self.skipped.push(SkippedFile {
            path,
            stage,
            reason,
        });
    }

    pub fn n_records(&self) -> usize {
        self.processed.iter().map(|r| r.records).sum()
    }

    pub fn log(&self) {
        log::info!(
            "Batch finished: {} succeeded, {} skipped, {} records written",
            self.processed.len(),
            self.skipped.len(),
            self.n_records()
        );
        for skipped in &self.skipped {
            log::warn!(
                "Skipped {} at {} stage: {}",
                skipped.path.display(),
                skipped.stage,
                skipped.reason
            );
        }
        if !self.analytes.is_empty() {
            log::info!(
                "Analytes seen: {}",
                self.analytes.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        if !self.materials.is_empty() {
            log::info!(
                "Materials seen: {}",
                self.materials.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress() {
        assert_eq!(BatchStatus::new(0, 4, String::from("a.csv")).progress, 0.25);
        assert_eq!(BatchStatus::new(3, 4, String::from("d.csv")).progress, 1.0);
        assert_eq!(BatchStatus::new(0, 0, String::new()).progress, 1.0);
    }

    #[test]
    fn test_summary_collects_vocabulary() {
        let mut summary = BatchSummary::default();
        summary.record_success(FileReport {
            path: PathBuf::from("a.csv"),
            records: 3,
            analytes: vec![String::from("IPA")],
            materials: vec![String::from("ZnO")],
            ..Default::default()
        });
        summary.record_success(FileReport {
            path: PathBuf::from("b.csv"),
            records: 2,
            analytes: vec![String::from("IPA"), String::from("Water")],
            materials: vec![String::from("CuO")],
            ..Default::default()
        });
        summary.record_skip(PathBuf::from("c.csv"), Stage::Metadata, String::from("no date"));
        assert_eq!(summary.n_records(), 5);
        assert_eq!(summary.analytes.len(), 2);
        assert_eq!(summary.materials.len(), 2);
        assert_eq!(summary.skipped[0].stage.to_string(), "metadata");
    }
}
