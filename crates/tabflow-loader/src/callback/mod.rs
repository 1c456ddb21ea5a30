//! Epoch-end callbacks.
//!
//! - [`Callback`]: hook invoked at the end of every training epoch
//! - [`CallbackList`]: runs validation callbacks before every other callback
//! - [`ValidationCallback`]: evaluates a [`Predictor`] on held-out data
//! - [`Metric`]: accumulators for validation metrics

mod metric;
mod validation;

use serde::Serialize;

pub use self::metric::{BinaryAccuracy, BinaryCrossEntropy, MeanSquaredError, Metric};
pub use self::validation::{Predictor, ValidationCallback};
use crate::error::LoaderResult;

/// Named values recorded for one epoch, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EpochLogs {
    epoch: usize,
    values: Vec<(String, f64)>,
}

impl EpochLogs {
    /// Creates empty logs for `epoch`.
    pub fn new(epoch: usize) -> Self {
        Self {
            epoch,
            values: Vec::new(),
        }
    }

    /// Returns the epoch index.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Records a value, replacing an earlier one with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    /// Returns a value by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// Iterates over recorded values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Hook invoked at the end of every training epoch.
pub trait Callback: Send {
    /// Called once per epoch with the logs recorded so far. Values written
    /// to `logs` are visible to callbacks that run later.
    fn on_epoch_end(&mut self, logs: &mut EpochLogs) -> LoaderResult<()>;

    /// Returns true for callbacks that compute validation metrics.
    fn is_validation(&self) -> bool {
        false
    }
}

/// Ordered set of callbacks.
#[derive(Default)]
pub struct CallbackList {
    callbacks: Vec<Box<dyn Callback>>,
}

impl CallbackList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback.
    #[must_use]
    pub fn with(mut self, callback: impl Callback + 'static) -> Self {
        self.push(callback);
        self
    }

    /// Adds a callback. Validation callbacks are placed after earlier
    /// validation callbacks and before every other callback.
    pub fn push(&mut self, callback: impl Callback + 'static) {
        let callback: Box<dyn Callback> = Box::new(callback);
        if callback.is_validation() {
            let position = self
                .callbacks
                .iter()
                .position(|c| !c.is_validation())
                .unwrap_or(self.callbacks.len());
            self.callbacks.insert(position, callback);
        } else {
            self.callbacks.push(callback);
        }
    }

    /// Returns the number of callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Returns true if there are no callbacks.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Runs every callback in order. The first error stops the remaining
    /// callbacks.
    pub fn on_epoch_end(&mut self, logs: &mut EpochLogs) -> LoaderResult<()> {
        for callback in &mut self.callbacks {
            callback.on_epoch_end(logs)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CallbackList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackList")
            .field("len", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct Recorder {
        seen: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl Callback for Recorder {
        fn on_epoch_end(&mut self, logs: &mut EpochLogs) -> LoaderResult<()> {
            let names = logs.iter().map(|(n, _)| n.to_owned()).collect();
            self.seen.lock().unwrap().push(names);
            Ok(())
        }
    }

    struct FakeValidation;

    impl Callback for FakeValidation {
        fn on_epoch_end(&mut self, logs: &mut EpochLogs) -> LoaderResult<()> {
            logs.insert("val_fake", 1.0);
            Ok(())
        }

        fn is_validation(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_validation_runs_first() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut callbacks = CallbackList::new()
            .with(Recorder { seen: seen.clone() })
            .with(FakeValidation);
        assert_eq!(callbacks.len(), 2);

        let mut logs = EpochLogs::new(0);
        logs.insert("loss", 0.3);
        callbacks.on_epoch_end(&mut logs).unwrap();

        assert_eq!(*seen.lock().unwrap(), [vec!["loss".to_owned(), "val_fake".to_owned()]]);
    }

    #[test]
    fn test_logs_replace_values() {
        let mut logs = EpochLogs::new(3);
        logs.insert("loss", 1.0);
        logs.insert("loss", 0.5);
        assert_eq!(logs.get("loss"), Some(0.5));
        assert_eq!(logs.iter().count(), 1);
        assert_eq!(logs.epoch(), 3);
    }

    #[test]
    fn test_logs_serialize_in_order() {
        let mut logs = EpochLogs::new(1);
        logs.insert("loss", 0.5);
        logs.insert("val_binary_accuracy", 0.75);
        let json = serde_json::to_value(&logs).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "epoch": 1,
                "values": [["loss", 0.5], ["val_binary_accuracy", 0.75]]
            })
        );
    }
}
