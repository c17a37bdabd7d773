//! Comma-separated persistence of study records, header `delta,rep,q,FDP`

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Result, SimError};
use crate::study::ResultRecord;

/// Column names of the persisted table, in order.
///
/// `rep` is the 0-based repetition index, so a study with `reps = 100` writes
/// reps 0 through 99.
pub const RESULT_HEADER: [&str; 4] = ["delta", "rep", "q", "FDP"];

/// Write records to any writer
pub fn write_records_to<W: Write>(writer: W, records: &[ResultRecord]) -> Result<()> {
    let mut out = BufWriter::new(writer);
    writeln!(out, "{}", RESULT_HEADER.join(","))?;
    // `{}` on f64 prints the shortest representation that parses back exactly
    for record in records {
        writeln!(
            out,
            "{},{},{},{}",
            record.delta, record.rep, record.q, record.fdp
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Write records to a CSV file
pub fn write_records<P: AsRef<Path>>(path: P, records: &[ResultRecord]) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_records_to(file, records)?;
    log::debug!("Wrote {} records to {}", records.len(), path.as_ref().display());
    Ok(())
}

/// Read records from any reader; rejection counts are not persisted and read back as 0
pub fn read_records_from<R: Read>(reader: R) -> Result<Vec<ResultRecord>> {
    let mut lines = BufReader::new(reader).lines();

    let header_line = lines.next().ok_or_else(|| SimError::EmptyData {
        reason: "Empty result table".to_string(),
    })??;
    let header: Vec<&str> = header_line.split(',').map(str::trim).collect();
    if header != RESULT_HEADER {
        return Err(SimError::InvalidResultTable {
            line: 1,
            reason: format!(
                "unexpected header '{}', expected '{}'",
                header_line.trim(),
                RESULT_HEADER.join(",")
            ),
        });
    }

    let mut records = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(parse_record(&line, idx + 2)?);
    }
    Ok(records)
}

/// Read records from a CSV file
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<ResultRecord>> {
    read_records_from(File::open(path)?)
}

fn parse_record(line: &str, line_no: usize) -> Result<ResultRecord> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != RESULT_HEADER.len() {
        return Err(SimError::InvalidResultTable {
            line: line_no,
            reason: format!(
                "row has {} columns, expected {}",
                fields.len(),
                RESULT_HEADER.len()
            ),
        });
    }

    let float = |i: usize| -> Result<f64> {
        fields[i].parse::<f64>().map_err(|_| SimError::InvalidResultTable {
            line: line_no,
            reason: format!("invalid {} value '{}'", RESULT_HEADER[i], fields[i]),
        })
    };
    let rep = fields[1].parse::<usize>().map_err(|_| SimError::InvalidResultTable {
        line: line_no,
        reason: format!("invalid rep value '{}'", fields[1]),
    })?;

    Ok(ResultRecord {
        delta: float(0)?,
        rep,
        q: float(2)?,
        fdp: float(3)?,
        n_rejected: 0,
        n_false: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_records() -> Vec<ResultRecord> {
        let mut records = Vec::new();
        for rep in 0..2 {
            for &delta in &[0.0, 0.05] {
                for &q in &[0.05, 0.1] {
                    records.push(ResultRecord {
                        delta,
                        rep,
                        q,
                        fdp: 1.0 / (3.0 + rep as f64 + q),
                        n_rejected: 7,
                        n_false: 2,
                    });
                }
            }
        }
        records
    }

    #[test]
    fn test_round_trip_reproduces_tuples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let records = sample_records();
        write_records(&path, &records).unwrap();

        let loaded = read_records(&path).unwrap();
        assert_eq!(loaded.len(), records.len());
        for (a, b) in records.iter().zip(&loaded) {
            assert_eq!(a.key(), b.key());
            assert_eq!(b.n_rejected, 0);
        }
    }

    #[test]
    fn test_header_is_fixed() {
        let mut buf = Vec::new();
        write_records_to(&mut buf, &sample_records()[..1]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().next(), Some("delta,rep,q,FDP"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_first_repetition_written_as_zero() {
        let mut buf = Vec::new();
        write_records_to(&mut buf, &sample_records()[..1]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let row: Vec<&str> = text.lines().nth(1).unwrap().split(',').collect();
        assert_eq!(row[RESULT_HEADER.iter().position(|&c| c == "rep").unwrap()], "0");
    }

    #[test]
    fn test_empty_table_keeps_header() {
        let mut buf = Vec::new();
        write_records_to(&mut buf, &[]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap().trim(), "delta,rep,q,FDP");
        assert!(read_records_from("delta,rep,q,FDP\n".as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_header_rejected() {
        let input = "delta,rep,alpha,FDP\n0,0,0.05,0.1\n";
        assert!(matches!(
            read_records_from(input.as_bytes()),
            Err(SimError::InvalidResultTable { line: 1, .. })
        ));
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let input = "delta,rep,q,FDP\n0,0,0.05,0.1\n0,x,0.1,0.2\n";
        assert!(matches!(
            read_records_from(input.as_bytes()),
            Err(SimError::InvalidResultTable { line: 3, .. })
        ));
    }
}
