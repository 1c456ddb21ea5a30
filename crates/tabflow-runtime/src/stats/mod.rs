//! Fitted statistics.
//!
//! [`Statistics`] maps `(operator, column)` to a [`Statistic`]. It is built
//! once by a fit pass, is immutable afterwards and is shared through an
//! `Arc` by every transform worker.

mod accumulator;
mod statistic;

use std::collections::BTreeMap;
use std::path::Path;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tabflow_core::ColumnManifest;
use uuid::Uuid;

pub(crate) use self::accumulator::Accumulator;
pub use self::statistic::{Statistic, Vocabulary};
use crate::TRACING_TARGET_STATS;
use crate::error::RuntimeResult;
use crate::ops::OperatorId;

/// Statistics of every stateful operator of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredStatistics", into = "StoredStatistics")]
pub struct Statistics {
    fingerprint: String,
    fit_id: Uuid,
    fitted_at: Timestamp,
    num_rows: u64,
    manifest: ColumnManifest,
    entries: BTreeMap<(OperatorId, String), Statistic>,
}

impl Statistics {
    pub(crate) fn new(
        fingerprint: String,
        manifest: ColumnManifest,
        num_rows: u64,
        entries: BTreeMap<(OperatorId, String), Statistic>,
    ) -> Self {
        Self {
            fingerprint,
            fit_id: Uuid::now_v7(),
            fitted_at: Timestamp::now(),
            num_rows,
            manifest,
            entries,
        }
    }

    /// Returns the statistic of `operator` for `column`.
    pub fn get(&self, operator: OperatorId, column: &str) -> Option<&Statistic> {
        self.entries.get(&(operator, column.to_owned()))
    }

    /// Iterates over every statistic in operator order.
    pub fn iter(&self) -> impl Iterator<Item = (OperatorId, &str, &Statistic)> {
        self.entries
            .iter()
            .map(|((id, column), stat)| (*id, column.as_str(), stat))
    }

    /// Returns the number of statistics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no statistics.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fingerprint of the workflow the statistics were fit for.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Identifier of the fit run.
    pub fn fit_id(&self) -> Uuid {
        self.fit_id
    }

    /// When the fit completed.
    pub fn fitted_at(&self) -> Timestamp {
        self.fitted_at
    }

    /// Rows seen by the first fit pass.
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Input manifest of the workflow the statistics were fit for.
    pub fn manifest(&self) -> &ColumnManifest {
        &self.manifest
    }

    /// Writes the statistics as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> RuntimeResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json).map_err(|e| tabflow_core::Error::io_at(path, e))?;

        tracing::info!(
            target: TRACING_TARGET_STATS,
            path = %path.display(),
            statistics = self.len(),
            fit_id = %self.fit_id,
            "Statistics saved"
        );
        Ok(())
    }

    /// Reads statistics written by [`Statistics::save`].
    pub fn load(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read(path).map_err(|e| tabflow_core::Error::io_at(path, e))?;
        let stats: Self = serde_json::from_slice(&json)?;

        tracing::info!(
            target: TRACING_TARGET_STATS,
            path = %path.display(),
            statistics = stats.len(),
            fit_id = %stats.fit_id,
            "Statistics loaded"
        );
        Ok(stats)
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct StoredStatistics {
    fingerprint: String,
    fit_id: Uuid,
    fitted_at: Timestamp,
    num_rows: u64,
    manifest: ColumnManifest,
    entries: Vec<StoredEntry>,
}

#[derive(Clone, Serialize, Deserialize)]
struct StoredEntry {
    operator: OperatorId,
    column: String,
    statistic: Statistic,
}

impl From<Statistics> for StoredStatistics {
    fn from(stats: Statistics) -> Self {
        Self {
            fingerprint: stats.fingerprint,
            fit_id: stats.fit_id,
            fitted_at: stats.fitted_at,
            num_rows: stats.num_rows,
            manifest: stats.manifest,
            entries: stats
                .entries
                .into_iter()
                .map(|((operator, column), statistic)| StoredEntry {
                    operator,
                    column,
                    statistic,
                })
                .collect(),
        }
    }
}

impl From<StoredStatistics> for Statistics {
    fn from(stored: StoredStatistics) -> Self {
        Self {
            fingerprint: stored.fingerprint,
            fit_id: stored.fit_id,
            fitted_at: stored.fitted_at,
            num_rows: stored.num_rows,
            manifest: stored.manifest,
            entries: stored
                .entries
                .into_iter()
                .map(|e| ((e.operator, e.column), e.statistic))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Statistics {
        let entries = BTreeMap::from([
            (
                (OperatorId::new(0, 0), "Age".to_owned()),
                Statistic::MinMax { min: 1.0, max: 24.0 },
            ),
            (
                (OperatorId::new(1, 0), "Type".to_owned()),
                Statistic::Vocabulary {
                    tokens: Vocabulary::try_from_tokens(vec!["Cat".into(), "Dog".into()])
                        .unwrap(),
                },
            ),
        ]);
        let manifest = ColumnManifest::new()
            .with_continuous(["Age"])
            .with_categorical(["Type"]);
        Statistics::new("abc".into(), manifest, 10, entries)
    }

    #[test]
    fn test_lookup() {
        let stats = sample();
        assert_eq!(stats.len(), 2);
        assert!(stats.get(OperatorId::new(0, 0), "Age").is_some());
        assert!(stats.get(OperatorId::new(0, 0), "Type").is_none());
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = sample();
        stats.save(&path).unwrap();
        assert_eq!(Statistics::load(&path).unwrap(), stats);
    }

    #[test]
    fn test_computed_values_reload_exactly() {
        let mut moments = Accumulator::moments();
        let values: Vec<f64> = (1..=97).map(|i| (f64::from(i) * 1.618).cos() / 3.0).collect();
        moments.observe(&tabflow_core::ColumnValues::Float(values)).unwrap();

        let entries = BTreeMap::from([
            ((OperatorId::new(0, 0), "Fee".to_owned()), moments.finish()),
            (
                (OperatorId::new(1, 0), "Fee".to_owned()),
                Statistic::MinMax {
                    min: f64::NEG_INFINITY,
                    max: 0.1 + 0.2,
                },
            ),
            (
                (OperatorId::new(2, 0), "Fee".to_owned()),
                Statistic::Median {
                    value: Some(f64::INFINITY),
                },
            ),
        ]);
        let stats = Statistics::new("abc".into(), ColumnManifest::new(), 97, entries);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        stats.save(&path).unwrap();
        let loaded = Statistics::load(&path).unwrap();
        assert_eq!(loaded, stats);
        assert!(matches!(
            loaded.get(OperatorId::new(0, 0), "Fee"),
            Some(Statistic::Moments { count: 97, .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let error = Statistics::load(dir.path().join("missing.json")).unwrap_err();
        assert_eq!(error.kind(), tabflow_core::ErrorKind::Io);
    }
}
