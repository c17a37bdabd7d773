//! Aggregation of FDP records per (delta, q)

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::StudyConfig;
use crate::error::Result;
use crate::stats::{mean, median, quantile_type7, sd, sorted_finite};
use crate::study::ResultRecord;

/// Distribution of FDP over repetitions for one (delta, q)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FdpSummary {
    pub delta: f64,
    pub q: f64,
    pub n: usize,
    pub mean: f64,
    pub sd: f64,
    pub median: f64,
    pub q05: f64,
    pub q95: f64,
    /// Fraction of repetitions whose FDP exceeds q
    pub frac_above_q: f64,
    /// mean FDP - q; positive means the nominal level is not held
    pub calibration_gap: f64,
}

/// Group records by (delta, q) in first-seen order and summarize each group
pub fn summarize(records: &[ResultRecord]) -> Vec<FdpSummary> {
    let mut groups: Vec<((f64, f64), Vec<f64>)> = Vec::new();
    for r in records {
        match groups.iter_mut().find(|(key, _)| *key == (r.delta, r.q)) {
            Some((_, values)) => values.push(r.fdp),
            None => groups.push(((r.delta, r.q), vec![r.fdp])),
        }
    }

    groups
        .into_iter()
        .map(|((delta, q), values)| {
            let sorted = sorted_finite(&values);
            let m = mean(&values);
            FdpSummary {
                delta,
                q,
                n: values.len(),
                mean: m,
                sd: sd(&values),
                median: median(&values),
                q05: quantile_type7(&sorted, 0.05),
                q95: quantile_type7(&sorted, 0.95),
                frac_above_q: values.iter().filter(|&&v| v > q).count() as f64 / values.len() as f64,
                calibration_gap: m - q,
            }
        })
        .collect()
}

#[derive(Serialize)]
struct SummaryDocument<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<&'a StudyConfig>,
    summaries: &'a [FdpSummary],
}

/// Write the summaries, with the configuration that produced them when known
pub fn write_summary_json<P: AsRef<Path>>(
    path: P,
    summaries: &[FdpSummary],
    config: Option<&StudyConfig>,
) -> Result<()> {
    let writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(writer, &SummaryDocument { config, summaries })?;
    log::debug!("Wrote {} summaries to {}", summaries.len(), path.as_ref().display());
    Ok(())
}

/// Fixed-width text table of the summaries
pub fn render_table(summaries: &[FdpSummary]) -> String {
    SummaryTable(summaries).to_string()
}

struct SummaryTable<'a>(&'a [FdpSummary]);

impl fmt::Display for SummaryTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>7} {:>6} {:>5} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>9}",
            "delta", "q", "n", "mean", "sd", "median", "q05", "q95", "P(>q)", "gap"
        )?;
        writeln!(f, "{}", "-".repeat(87))?;
        for s in self.0 {
            writeln!(
                f,
                "{:>7.3} {:>6.3} {:>5} {:>8.4} {:>8.4} {:>8.4} {:>8.4} {:>8.4} {:>8.3} {:>+9.4}",
                s.delta, s.q, s.n, s.mean, s.sd, s.median, s.q05, s.q95, s.frac_above_q, s.calibration_gap
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(delta: f64, rep: usize, q: f64, fdp: f64) -> ResultRecord {
        ResultRecord {
            delta,
            rep,
            q,
            fdp,
            n_rejected: 0,
            n_false: 0,
        }
    }

    #[test]
    fn test_summarize_groups_in_first_seen_order() {
        let records = vec![
            record(0.0, 0, 0.05, 0.0),
            record(0.0, 0, 0.1, 0.2),
            record(0.0, 1, 0.05, 0.1),
            record(0.0, 1, 0.1, 0.0),
            record(0.1, 0, 0.05, 0.5),
        ];
        let summaries = summarize(&records);
        assert_eq!(summaries.len(), 3);
        assert_eq!((summaries[0].delta, summaries[0].q), (0.0, 0.05));
        assert_eq!((summaries[1].delta, summaries[1].q), (0.0, 0.1));
        assert_eq!((summaries[2].delta, summaries[2].q), (0.1, 0.05));

        let first = &summaries[0];
        assert_eq!(first.n, 2);
        assert!((first.mean - 0.05).abs() < 1e-12);
        assert!((first.median - 0.05).abs() < 1e-12);
        assert!((first.frac_above_q - 0.5).abs() < 1e-12);
        assert!(first.calibration_gap.abs() < 1e-12);
        assert!((first.q95 - 0.095).abs() < 1e-12);

        // A single repetition has no spread estimate
        assert!(summaries[2].sd.is_nan());
        assert_eq!(summaries[2].frac_above_q, 1.0);
    }

    #[test]
    fn test_render_table_has_row_per_summary() {
        let summaries = summarize(&[record(0.0, 0, 0.05, 0.1), record(0.0, 1, 0.05, 0.0)]);
        let table = render_table(&summaries);
        assert_eq!(table.lines().count(), 3);
        assert!(table.lines().next().unwrap().contains("delta"));
    }

    #[test]
    fn test_write_summary_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summaries = summarize(&[record(0.0, 0, 0.1, 0.3), record(0.0, 1, 0.1, 0.1)]);
        write_summary_json(&path, &summaries, Some(&StudyConfig::default())).unwrap();

        let value: serde_json::Value = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(value["summaries"].as_array().map(|a| a.len()), Some(1));
        assert_eq!(value["config"]["reps"], 100);
    }
}
