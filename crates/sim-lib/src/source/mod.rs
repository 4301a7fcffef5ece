//! Metric sources feeding the pipeline
//!
//! A source yields one [`MetricRecord`] per tick over a finite, restartable
//! sequence. The synthetic source reproduces a four-phase traffic scenario
//! from a seed; the replay source plays back a recorded corpus.

mod replay;
mod synthetic;

pub use replay::ReplaySource;
pub use synthetic::{SyntheticSource, TrafficPhase};

use crate::config::{SourceConfig, SourceKind};
use crate::error::{Result, SimError};
use crate::models::MetricRecord;

/// Producer of metric records
pub trait MetricSource: Send {
    /// Next record, or `None` once the sequence is exhausted
    fn next_record(&mut self) -> Option<MetricRecord>;

    /// Restart the sequence from its first record
    fn reset(&mut self);

    /// Short label used in logs
    fn name(&self) -> &'static str;

    /// Most distinct cells any record will carry, when known before the run
    fn max_cells(&self) -> Option<usize> {
        None
    }
}

/// Build the source described by the configuration
pub fn build_source(config: &SourceConfig, max_ticks: Option<u64>) -> Result<Box<dyn MetricSource>> {
    match config.kind {
        SourceKind::Synthetic => {
            let mut source = SyntheticSource::new(config.clone());
            if let Some(limit) = max_ticks {
                source = source.with_limit(limit);
            }
            Ok(Box::new(source))
        }
        SourceKind::Replay => {
            let path = config
                .replay_path
                .as_ref()
                .ok_or_else(|| SimError::config("source.replay_path is required for replay"))?;
            Ok(Box::new(ReplaySource::from_jsonl(path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_synthetic_source_with_limit() {
        let config = SourceConfig {
            cells: 3,
            ..Default::default()
        };
        let mut source = build_source(&config, Some(5)).unwrap();
        assert_eq!(source.name(), "synthetic");

        let records: Vec<_> = std::iter::from_fn(|| source.next_record()).collect();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].cells.len(), 3);
    }

    #[test]
    fn test_build_replay_source_requires_existing_file() {
        let config = SourceConfig {
            kind: SourceKind::Replay,
            replay_path: Some("/nonexistent/corpus.jsonl".into()),
            ..Default::default()
        };
        assert!(build_source(&config, None).is_err());
    }
}
