use super::raw_log::{RawLog, FLOW_COLUMN};

/// Gas flow set points of one row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowRatio {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl FlowRatio {
    /// Parse an `A:B:C` cell. Surrounding brackets and whitespace are ignored.
    pub fn parse(cell: &str) -> Option<Self> {
        let inner = cell.trim().trim_start_matches('[').trim_end_matches(']');
        let parts: Vec<f64> = inner
            .split(':')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [a, b, c] if a.is_finite() && b.is_finite() && c.is_finite() => Some(Self {
                a: *a,
                b: *b,
                c: *c,
            }),
            _ => None,
        }
    }

    /// Estimated concentration, or None when no gas flows through A or C
    pub fn ppm(&self, saturation_ppm: f64) -> Option<f64> {
        let denominator = self.a + self.c;
        if denominator == 0.0 {
            None
        } else {
            Some(saturation_ppm * self.c / denominator)
        }
    }
}

/// Per-row flow ratios of a log, None where a cell does not parse
pub fn flow_ratios(log: &RawLog) -> Option<Vec<Option<FlowRatio>>> {
    let column = log.column(FLOW_COLUMN)?;
    Some(column.iter().map(|cell| FlowRatio::parse(cell)).collect())
}

/// Average flow-derived concentration over the given rows.
///
/// Returns None, after logging why, when the flow column is absent or unparseable, or when
/// every selected row has a zero denominator.
pub fn mean_concentration(
    ratios: Option<&[Option<FlowRatio>]>,
    rows: &[usize],
    saturation_ppm: f64,
    series: &str,
) -> Option<f64> {
    let Some(ratios) = ratios else {
        log::warn!("{series} has no '{FLOW_COLUMN}' column; no concentration computed");
        return None;
    };
    let parsed: Vec<FlowRatio> = rows
        .iter()
        .filter_map(|&r| ratios.get(r).copied().flatten())
        .collect();
    if parsed.is_empty() {
        log::warn!("{series} has no readable '{FLOW_COLUMN}' values in the cycling rows");
        return None;
    }
    let ppms: Vec<f64> = parsed.iter().filter_map(|f| f.ppm(saturation_ppm)).collect();
    if ppms.is_empty() {
        log::warn!("{series} has a zero A + C flow in every cycling row");
        return None;
    }
    Some(ppms.iter().sum::<f64>() / ppms.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_log::tests::log_from_str;

    #[test]
    fn test_parse_cells() {
        assert_eq!(
            FlowRatio::parse("[10:0:5]"),
            Some(FlowRatio {
                a: 10.0,
                b: 0.0,
                c: 5.0
            })
        );
        assert_eq!(FlowRatio::parse(" 1.5 : 2 : 3 ").map(|f| f.c), Some(3.0));
        assert_eq!(FlowRatio::parse("10:5"), None);
        assert_eq!(FlowRatio::parse("nan"), None);
        assert_eq!(FlowRatio::parse(""), None);
    }

    #[test]
    fn test_ppm() {
        let flow = FlowRatio {
            a: 30.0,
            b: 0.0,
            c: 10.0,
        };
        assert_eq!(flow.ppm(28483.0), Some(28483.0 * 10.0 / 40.0));
        let none = FlowRatio {
            a: 0.0,
            b: 50.0,
            c: 0.0,
        };
        assert_eq!(none.ppm(28483.0), None);
    }

    #[test]
    fn test_mean_concentration() {
        let log = log_from_str(
            "flow.csv",
            "Time,Stage,Flow [A:B:C]\n0,Pre,[0:50:0]\n1,On,[10:0:10]\n2,On,[30:0:10]\n3,Off,[0:50:0]\n",
        );
        let ratios = flow_ratios(&log).unwrap();
        let mean = mean_concentration(Some(ratios.as_slice()), &[1, 2], 1000.0, "flow").unwrap();
        assert_eq!(mean, (500.0 + 250.0) / 2.0);
        assert_eq!(mean_concentration(Some(ratios.as_slice()), &[0, 3], 1000.0, "flow"), None);
    }

    #[test]
    fn test_missing_or_unreadable_flow() {
        let log = log_from_str("flow.csv", "Time,Stage\n0,On\n");
        assert!(flow_ratios(&log).is_none());
        assert_eq!(mean_concentration(None, &[0], 1000.0, "flow"), None);

        let log = log_from_str("flow.csv", "Time,Stage,Flow [A:B:C]\n0,On,\n1,On,nan\n");
        let ratios = flow_ratios(&log).unwrap();
        assert_eq!(mean_concentration(Some(ratios.as_slice()), &[0, 1], 1000.0, "flow"), None);
    }
}
