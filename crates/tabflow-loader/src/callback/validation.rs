//! Validation on held-out data.

use std::time::Instant;

use super::{Callback, EpochLogs, Metric};
use crate::TRACING_TARGET_CALLBACK;
use crate::batch::Batch;
use crate::error::{LoaderError, LoaderResult};
use crate::loader::StreamingLoader;

/// The model seam: produces one prediction per row of a batch.
pub trait Predictor: Send {
    /// Predicts every row of `batch`.
    fn predict(&mut self, batch: &Batch) -> LoaderResult<Vec<f32>>;
}

impl<F> Predictor for F
where
    F: FnMut(&Batch) -> LoaderResult<Vec<f32>> + Send,
{
    fn predict(&mut self, batch: &Batch) -> LoaderResult<Vec<f32>> {
        self(batch)
    }
}

/// Evaluates a predictor over one full validation epoch at the end of every
/// training epoch and records `val_<metric>`.
///
/// A loader or predictor error ends the evaluation; no partial metric is
/// recorded.
pub struct ValidationCallback<P, M> {
    loader: StreamingLoader,
    predictor: P,
    metric: M,
    label: String,
}

impl<P: Predictor, M: Metric> ValidationCallback<P, M> {
    /// Creates a callback comparing predictions with the `label` column.
    pub fn new(
        loader: StreamingLoader,
        predictor: P,
        metric: M,
        label: impl Into<String>,
    ) -> LoaderResult<Self> {
        let label = label.into();
        if !loader.features().all().any(|name| name == label) {
            return Err(LoaderError::missing(label));
        }
        Ok(Self {
            loader,
            predictor,
            metric,
            label,
        })
    }

    /// Returns the key written to the epoch logs.
    pub fn log_key(&self) -> String {
        format!("val_{}", self.metric.name())
    }

    /// Evaluates one full epoch of the validation loader.
    pub fn evaluate(&mut self) -> LoaderResult<f64> {
        self.metric.reset();
        for batch in self.loader.epoch()? {
            let batch = batch?;
            let predictions = self.predictor.predict(&batch)?;
            let labels = batch.require(&self.label)?.to_f32();
            if predictions.len() != labels.len() {
                return Err(LoaderError::InvalidConfig(format!(
                    "predictor returned {} values for a batch of {} rows",
                    predictions.len(),
                    labels.len()
                )));
            }
            self.metric.update(&predictions, &labels);
        }
        Ok(self.metric.result())
    }

    /// Returns the metric.
    pub fn metric(&self) -> &M {
        &self.metric
    }

    /// Returns the predictor.
    pub fn predictor_mut(&mut self) -> &mut P {
        &mut self.predictor
    }
}

impl<P: Predictor, M: Metric> Callback for ValidationCallback<P, M> {
    fn on_epoch_end(&mut self, logs: &mut EpochLogs) -> LoaderResult<()> {
        let started = Instant::now();
        let value = self.evaluate()?;
        let key = self.log_key();

        tracing::info!(
            target: TRACING_TARGET_CALLBACK,
            epoch = logs.epoch(),
            metric = %key,
            value,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Validation finished"
        );
        logs.insert(key, value);
        Ok(())
    }

    fn is_validation(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use tabflow_core::io::{Dataset, ReaderOptions, write_partition};
    use tabflow_core::{Column, ColumnManifest, DeviceContext, MemoryConfig, Partition};

    use super::*;
    use crate::callback::{BinaryAccuracy, CallbackList};
    use crate::config::LoaderConfigBuilder;

    fn validation_loader(dir: &std::path::Path) -> StreamingLoader {
        let part = Partition::new(vec![
            Column::float("score", vec![0.9, 0.1, 0.8, 0.4, 0.7, 0.2, 0.6, 0.3]),
            Column::int("label", vec![1, 0, 1, 1, 0, 0, 1, 0]),
        ])
        .unwrap();
        write_partition(dir.join("valid.tfp"), &part).unwrap();

        let device = DeviceContext::initialize(MemoryConfig::new(1 << 30)).unwrap();
        let dataset = Dataset::open(dir.to_str().unwrap(), &device, ReaderOptions::new()).unwrap();
        let features = ColumnManifest::new()
            .with_continuous(["score"])
            .with_label(["label"]);
        let config = LoaderConfigBuilder::default().batch_size(3usize).build().unwrap();
        StreamingLoader::new(dataset, features, config, &device).unwrap()
    }

    fn passthrough(batch: &Batch) -> LoaderResult<Vec<f32>> {
        Ok(batch.require("score")?.to_f32())
    }

    #[test]
    fn test_writes_validation_metric() {
        let dir = tempfile::tempdir().unwrap();
        let callback = ValidationCallback::new(
            validation_loader(dir.path()),
            passthrough,
            BinaryAccuracy::new(),
            "label",
        )
        .unwrap();
        assert_eq!(callback.log_key(), "val_binary_accuracy");

        let mut callbacks = CallbackList::new().with(callback);
        for epoch in 0..2 {
            let mut logs = EpochLogs::new(epoch);
            callbacks.on_epoch_end(&mut logs).unwrap();
            assert_eq!(logs.get("val_binary_accuracy"), Some(0.75));
        }
    }

    #[test]
    fn test_loader_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let loader = validation_loader(dir.path());
        let mut contents = std::fs::read_to_string(&loader.dataset().files()[0]).unwrap();
        contents.push_str("not json\n");
        std::fs::write(&loader.dataset().files()[0], contents).unwrap();

        let mut callback =
            ValidationCallback::new(loader, passthrough, BinaryAccuracy::new(), "label").unwrap();
        let mut logs = EpochLogs::new(0);
        let error = callback.on_epoch_end(&mut logs).unwrap_err();
        assert_eq!(error.kind(), tabflow_core::ErrorKind::Io);
        assert!(logs.get("val_binary_accuracy").is_none());
    }

    #[test]
    fn test_predictor_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let failing = |_: &Batch| -> LoaderResult<Vec<f32>> {
            Err(LoaderError::InvalidConfig("model not built".into()))
        };
        let mut callback = ValidationCallback::new(
            validation_loader(dir.path()),
            failing,
            BinaryAccuracy::new(),
            "label",
        )
        .unwrap();
        let mut logs = EpochLogs::new(0);
        assert!(callback.on_epoch_end(&mut logs).is_err());
        assert!(logs.is_empty());
    }

    #[test]
    fn test_unknown_label() {
        let dir = tempfile::tempdir().unwrap();
        let result = ValidationCallback::new(
            validation_loader(dir.path()),
            passthrough,
            BinaryAccuracy::new(),
            "AdoptionSpeed",
        );
        assert!(matches!(result, Err(LoaderError::MissingFeature { .. })));
    }
}
