//! Minimal epoch driver.

use std::time::Instant;

use crate::TRACING_TARGET_LOADER;
use crate::batch::Batch;
use crate::callback::{Callback, CallbackList, EpochLogs};
use crate::error::LoaderResult;
use crate::loader::StreamingLoader;

/// Runs training epochs over a loader and invokes callbacks after each.
///
/// The optimizer step is supplied by the caller; the trainer only drives
/// the loop and records the mean step loss as `loss`.
pub struct Trainer {
    loader: StreamingLoader,
    callbacks: CallbackList,
}

impl Trainer {
    /// Creates a trainer over `loader`.
    pub fn new(loader: StreamingLoader) -> Self {
        Self {
            loader,
            callbacks: CallbackList::new(),
        }
    }

    /// Adds a callback.
    #[must_use]
    pub fn with_callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Returns the training loader.
    pub fn loader(&self) -> &StreamingLoader {
        &self.loader
    }

    /// Runs `epochs` epochs, calling `step` for every batch; `step` returns
    /// the batch loss. Returns the logs of every epoch.
    pub fn fit<F>(&mut self, epochs: usize, mut step: F) -> LoaderResult<Vec<EpochLogs>>
    where
        F: FnMut(&Batch) -> LoaderResult<f64>,
    {
        let mut history = Vec::with_capacity(epochs);
        for epoch in 0..epochs {
            let started = Instant::now();
            let (mut loss, mut batches, mut rows) = (0.0, 0usize, 0usize);
            for batch in self.loader.epoch()? {
                let batch = batch?;
                loss += step(&batch)?;
                batches += 1;
                rows += batch.num_rows();
            }

            let mean_loss = if batches == 0 { f64::NAN } else { loss / batches as f64 };
            let mut logs = EpochLogs::new(epoch);
            logs.insert("loss", mean_loss);
            self.callbacks.on_epoch_end(&mut logs)?;

            tracing::info!(
                target: TRACING_TARGET_LOADER,
                epoch,
                batches,
                rows,
                loss = mean_loss,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Epoch finished"
            );
            history.push(logs);
        }
        Ok(history)
    }
}
