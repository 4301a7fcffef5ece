//! Replay of recorded metric records

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::{info, warn};

use super::MetricSource;
use crate::error::{Result, SimError};
use crate::models::MetricRecord;

/// Plays back a fixed corpus of records
pub struct ReplaySource {
    records: Vec<MetricRecord>,
    position: usize,
    max_cells: usize,
}

impl ReplaySource {
    pub fn from_records(records: Vec<MetricRecord>) -> Self {
        let max_cells = records.iter().map(distinct_cells).max().unwrap_or(0);
        Self {
            records,
            position: 0,
            max_cells,
        }
    }

    /// Load a JSON-lines corpus, one record per line.
    ///
    /// Blank lines are ignored and lines that do not parse are skipped with a
    /// warning.
    pub fn from_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SimError::Source(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<MetricRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!(line = line_no + 1, error = %e, "Skipping malformed record");
                }
            }
        }

        info!(
            path = %path.display(),
            records = records.len(),
            skipped,
            "Loaded replay corpus"
        );
        Ok(Self::from_records(records))
    }

    /// Write records as JSON lines
    pub fn save_jsonl(path: impl AsRef<Path>, records: &[MetricRecord]) -> Result<()> {
        let mut file = fs::File::create(path)?;
        for record in records {
            serde_json::to_writer(&mut file, record)?;
            file.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl MetricSource for ReplaySource {
    fn next_record(&mut self) -> Option<MetricRecord> {
        let record = self.records.get(self.position)?.clone();
        self.position += 1;
        Some(record)
    }

    fn reset(&mut self) {
        self.position = 0;
    }

    fn name(&self) -> &'static str {
        "replay"
    }

    fn max_cells(&self) -> Option<usize> {
        Some(self.max_cells)
    }
}

/// Cells left after the preprocessor drops unnamed and duplicate entries
fn distinct_cells(record: &MetricRecord) -> usize {
    record
        .cells
        .iter()
        .filter(|c| !c.cell_id.is_empty())
        .map(|c| c.cell_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellMetrics;
    use tempfile::tempdir;

    fn record(tick: u64) -> MetricRecord {
        MetricRecord {
            tick,
            timestamp: 1_700_000_000 + tick as i64,
            cells: vec![CellMetrics::with_load("Cell-1", tick as f64)],
        }
    }

    #[test]
    fn test_replay_and_reset() {
        let mut source = ReplaySource::from_records(vec![record(1), record(2)]);
        assert_eq!(source.next_record().unwrap().tick, 1);
        assert_eq!(source.next_record().unwrap().tick, 2);
        assert!(source.next_record().is_none());

        source.reset();
        assert_eq!(source.next_record().unwrap().tick, 1);
    }

    #[test]
    fn test_jsonl_round_trip_skips_bad_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corpus.jsonl");
        ReplaySource::save_jsonl(&path, &[record(1), record(2)]).unwrap();

        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("\nnot json\n");
        std::fs::write(&path, content).unwrap();

        let source = ReplaySource::from_jsonl(&path).unwrap();
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_max_cells_ignores_duplicates() {
        let mut wide = record(2);
        wide.cells.push(CellMetrics::with_load("Cell-2", 10.0));
        wide.cells.push(CellMetrics::with_load("Cell-2", 11.0));
        wide.cells.push(CellMetrics::with_load("", 12.0));

        let source = ReplaySource::from_records(vec![record(1), wide]);
        assert_eq!(source.max_cells(), Some(2));
        assert_eq!(ReplaySource::from_records(Vec::new()).max_cells(), Some(0));
    }

    #[test]
    fn test_missing_file_is_source_error() {
        let err = ReplaySource::from_jsonl("/nonexistent/corpus.jsonl")
            .err()
            .unwrap();
        assert!(matches!(err, SimError::Source(_)));
    }
}
