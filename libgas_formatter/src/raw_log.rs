use std::io::Read;
use std::path::{Path, PathBuf};

use super::error::TableError;

/// Time column names, in order of preference
pub const TIME_COLUMNS: [&str; 2] = ["Elapsed Time (s)", "Time"];
/// Phase label column names, in order of preference
pub const LABEL_COLUMNS: [&str; 2] = ["Cycle", "Stage"];
pub const CURRENT_COLUMN: &str = "Current (uA)";
/// Single resistance column of a log that already holds one sensor
pub const RESISTANCE_COLUMN: &str = "Resistance";
pub const FLOW_COLUMN: &str = "Flow [A:B:C]";

/// Column name of relay `n` (1-based)
pub fn relay_column(relay: u8) -> String {
    format!("Relay {relay} Resistance")
}

/// A tabular acquisition log, stored column by column as raw text.
///
/// Values are parsed on demand so that a log can carry numeric and text columns alike.
/// Derivations (row selections) copy; a RawLog is never modified after it is read.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLog {
    source: PathBuf,
    headers: Vec<String>,
    columns: Vec<Vec<String>>,
}

impl RawLog {
    /// Read a CSV log from disk
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        if !path.exists() {
            return Err(TableError::BadFilePath(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(path, file)
    }

    /// Read a CSV log from any reader. `source` names the log in derived output.
    pub fn from_reader<R: Read>(source: &Path, reader: R) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for result in reader.records() {
            let record = result?;
            for (idx, column) in columns.iter_mut().enumerate() {
                column.push(record.get(idx).unwrap_or("").trim().to_string());
            }
        }
        Ok(Self {
            source: source.to_path_buf(),
            headers,
            columns,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// File name of the source without its extension
    pub fn source_stem(&self) -> String {
        self.source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    /// Raw text of a column, if present
    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.headers
            .iter()
            .position(|h| h == name)
            .map(|idx| self.columns[idx].as_slice())
    }

    /// Raw text of a column, failing if it is absent
    pub fn require_column(&self, name: &str) -> Result<&[String], TableError> {
        self.column(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Parse a column as floating point. Empty and NaN cells become NaN.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>, TableError> {
        self.require_column(name)?
            .iter()
            .enumerate()
            .map(|(row, cell)| parse_cell(cell).ok_or_else(|| TableError::BadValue {
                column: name.to_string(),
                row,
                value: cell.clone(),
            }))
            .collect()
    }

    /// Name of the first time column present in the log
    pub fn time_column_name(&self) -> Result<&'static str, TableError> {
        TIME_COLUMNS
            .into_iter()
            .find(|name| self.has_column(name))
            .ok_or_else(|| TableError::MissingColumn(TIME_COLUMNS.join(" or ")))
    }

    /// The time axis. Timestamps must be finite and strictly increasing.
    pub fn times(&self) -> Result<Vec<f64>, TableError> {
        let name = self.time_column_name()?;
        let times = self.numeric_column(name)?;
        for (row, t) in times.iter().enumerate() {
            if !t.is_finite() {
                return Err(TableError::BadValue {
                    column: name.to_string(),
                    row,
                    value: t.to_string(),
                });
            }
        }
        if let Some(row) = times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(TableError::NonIncreasingTime(row + 1));
        }
        Ok(times)
    }

    /// Name of the first phase label column present in the log
    pub fn label_column_name(&self) -> Result<&'static str, TableError> {
        LABEL_COLUMNS
            .into_iter()
            .find(|name| self.has_column(name))
            .ok_or_else(|| TableError::MissingColumn(LABEL_COLUMNS.join(" or ")))
    }

    /// The phase label of each row
    pub fn labels(&self) -> Result<&[String], TableError> {
        let name = self.label_column_name()?;
        self.require_column(name)
    }

    /// Copy the given rows, in the given order, into a new log with a new source name
    pub fn select_rows(&self, rows: &[usize], source: &Path) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|column| rows.iter().map(|&r| column[r].clone()).collect())
            .collect();
        Self {
            source: source.to_path_buf(),
            headers: self.headers.clone(),
            columns,
        }
    }

    /// Write the log back out as CSV
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in 0..self.n_rows() {
            writer.write_record(self.columns.iter().map(|c| c[row].as_str()))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Parse one cell, treating blanks and the usual NaN spellings as NaN
fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    cell.parse::<f64>().ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn log_from_str(name: &str, text: &str) -> RawLog {
        RawLog::from_reader(Path::new(name), text.as_bytes()).unwrap()
    }

    #[test]
    fn test_read_columns() {
        let log = log_from_str(
            "run.csv",
            "Elapsed Time (s),Relay 1 Resistance,Cycle\n0,10.5,Pre\n1,,On1\n2,nan,Off1\n",
        );
        assert_eq!(log.n_rows(), 3);
        assert_eq!(log.source_stem(), "run");
        assert_eq!(log.times().unwrap(), vec![0.0, 1.0, 2.0]);
        let relay = log.numeric_column(&relay_column(1)).unwrap();
        assert_eq!(relay[0], 10.5);
        assert!(relay[1].is_nan() && relay[2].is_nan());
        assert_eq!(log.labels().unwrap(), &["Pre", "On1", "Off1"]);
    }

    #[test]
    fn test_alternate_column_names() {
        let log = log_from_str("rig.csv", "Time,Current (uA),Stage\n0.5,1,Pre\n1.0,2,On\n");
        assert_eq!(log.time_column_name().unwrap(), "Time");
        assert_eq!(log.label_column_name().unwrap(), "Stage");
    }

    #[test]
    fn test_missing_column() {
        let log = log_from_str("run.csv", "Time,Value\n0,1\n");
        assert!(matches!(log.labels(), Err(TableError::MissingColumn(_))));
        assert!(matches!(
            log.numeric_column("Relay 2 Resistance"),
            Err(TableError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_non_increasing_time_rejected() {
        let log = log_from_str("run.csv", "Time,Cycle\n0,Pre\n1,On\n1,On\n");
        assert!(matches!(log.times(), Err(TableError::NonIncreasingTime(2))));
    }

    #[test]
    fn test_bad_value_reported() {
        let log = log_from_str("run.csv", "Time,Cycle\n0,Pre\nabc,On\n");
        match log.times() {
            Err(TableError::BadValue { row, value, .. }) => {
                assert_eq!(row, 1);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_select_rows_copies() {
        let log = log_from_str("run.csv", "Time,Cycle\n0,Pre\n1,On\n2,Off\n");
        let subset = log.select_rows(&[2, 1], Path::new("subset.csv"));
        assert_eq!(subset.labels().unwrap(), &["Off", "On"]);
        assert_eq!(subset.source_stem(), "subset");
        assert_eq!(log.n_rows(), 3);
    }

    #[test]
    fn test_write_csv() {
        let log = log_from_str("run.csv", "Time,Cycle\n0,Pre\n1,On\n");
        let mut out = Vec::new();
        log.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Time,Cycle\n0,Pre\n1,On\n");
    }
}
