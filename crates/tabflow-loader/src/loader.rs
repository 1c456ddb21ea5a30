//! Streaming batch loader.

use std::thread::JoinHandle;
use std::time::Instant;

use futures::Stream;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tabflow_core::io::{DEFAULT_PART_MEM_FRACTION, Dataset};
use tabflow_core::{ColumnManifest, DeviceContext, Partition, Schema};
use tabflow_runtime::InlineTransform;
use tokio::sync::mpsc;

use crate::TRACING_TARGET_LOADER;
use crate::batch::Batch;
use crate::config::LoaderConfig;
use crate::error::{LoaderError, LoaderResult};

/// Streams shuffled batches from a dataset, one pass per epoch.
///
/// Each epoch runs a producer thread that reads `buffer_size` partitions at
/// a time, applies the inline transform, shuffles rows within that working
/// set and cuts it into batches. At most `prefetch` batches wait in the
/// channel; the producer blocks when the consumer falls behind.
pub struct StreamingLoader {
    dataset: Dataset,
    features: ColumnManifest,
    transform: Option<InlineTransform>,
    config: LoaderConfig,
    working_set_budget: u64,
    epochs: u64,
}

impl StreamingLoader {
    /// Creates a loader yielding the `features` columns of `dataset`.
    ///
    /// Fails with a missing feature when a feature column is absent from
    /// the dataset schema.
    pub fn new(
        dataset: Dataset,
        features: ColumnManifest,
        config: LoaderConfig,
        device: &DeviceContext,
    ) -> LoaderResult<Self> {
        features
            .validate()
            .map_err(|e| LoaderError::InvalidConfig(e.to_string()))?;
        if config.batch_size == 0 || config.buffer_size == 0 || config.prefetch == 0 {
            return Err(LoaderError::InvalidConfig(
                "batch_size, buffer_size and prefetch must be at least 1".into(),
            ));
        }

        let working_set_budget = device
            .partition_budget(DEFAULT_PART_MEM_FRACTION)
            .saturating_mul(config.buffer_size as u64);

        let loader = Self {
            dataset,
            features,
            transform: None,
            config,
            working_set_budget,
            epochs: 0,
        };
        loader.check_features(loader.dataset.schema())?;

        tracing::debug!(
            target: TRACING_TARGET_LOADER,
            files = loader.dataset.num_files(),
            batch_size = loader.config.batch_size,
            buffer_size = loader.config.buffer_size,
            prefetch = loader.config.prefetch,
            shuffle = loader.config.shuffle,
            "Streaming loader created"
        );
        Ok(loader)
    }

    /// Applies `transform` to every partition before batching.
    pub fn with_transform(mut self, transform: InlineTransform) -> LoaderResult<Self> {
        let schema = transform.output_schema(self.dataset.schema())?;
        self.check_features(&schema)?;
        self.transform = Some(transform);
        Ok(self)
    }

    fn check_features(&self, schema: &Schema) -> LoaderResult<()> {
        match self.features.all().find(|name| !schema.contains(name)) {
            Some(name) => Err(LoaderError::missing(name)),
            None => Ok(()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Returns the loaded feature columns.
    pub fn features(&self) -> &ColumnManifest {
        &self.features
    }

    /// Returns the dataset.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Returns the number of epochs started so far.
    pub fn epochs_started(&self) -> u64 {
        self.epochs
    }

    /// Counts the rows of one epoch.
    pub fn num_rows(&self) -> LoaderResult<usize> {
        Ok(self.dataset.num_rows()?)
    }

    /// Counts the batches the next epoch yields.
    ///
    /// Reads only row group lengths. The count follows the file order of
    /// the next epoch, since working sets are cut at partition boundaries.
    pub fn num_batches(&self) -> LoaderResult<usize> {
        let order = self.dataset.file_order(self.epoch_seed(self.epochs));
        let partitions = self.dataset.partition_sizes(&order)?;

        Ok(partitions
            .chunks(self.config.buffer_size)
            .map(|set| set.iter().sum::<usize>().div_ceil(self.config.batch_size))
            .sum())
    }

    fn epoch_seed(&self, epoch: u64) -> Option<u64> {
        self.config.shuffle.then_some(self.config.seed.wrapping_add(epoch))
    }

    /// Starts the next epoch.
    ///
    /// Iterating the returned [`Epoch`] blocks the calling thread and panics
    /// inside an async runtime; async callers use [`stream`](Self::stream).
    pub fn epoch(&mut self) -> LoaderResult<Epoch> {
        let index = self.epochs;
        self.epochs += 1;

        let (tx, rx) = mpsc::channel(self.config.prefetch);
        let producer = Producer {
            dataset: self.dataset.clone(),
            features: self.features.clone(),
            transform: self.transform.clone(),
            config: self.config.clone(),
            working_set_budget: self.working_set_budget,
            epoch: index,
        };

        tracing::debug!(
            target: TRACING_TARGET_LOADER,
            epoch = index,
            files = self.dataset.num_files(),
            "Epoch started"
        );

        let handle = std::thread::Builder::new()
            .name(format!("tabflow-loader-epoch-{index}"))
            .spawn(move || producer.run(tx))
            .map_err(|e| LoaderError::ProducerFailed(e.to_string()))?;

        Ok(Epoch {
            index,
            rx,
            handle: Some(handle),
            done: false,
        })
    }

    /// Starts the next epoch as an async stream. Safe to poll from any
    /// runtime.
    pub fn stream(&mut self) -> LoaderResult<impl Stream<Item = LoaderResult<Batch>> + Send> {
        Ok(self.epoch()?.into_stream())
    }
}

/// Messages from the producer thread.
enum Message {
    Batch(Batch),
    Failed(LoaderError),
    Finished,
}

/// Reads, transforms and batches one epoch.
struct Producer {
    dataset: Dataset,
    features: ColumnManifest,
    transform: Option<InlineTransform>,
    config: LoaderConfig,
    working_set_budget: u64,
    epoch: u64,
}

impl Producer {
    fn run(self, tx: mpsc::Sender<Message>) {
        let started = Instant::now();
        match self.produce(&tx) {
            Ok(Some((batches, rows))) => {
                tracing::debug!(
                    target: TRACING_TARGET_LOADER,
                    epoch = self.epoch,
                    batches,
                    rows,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Epoch produced"
                );
                let _ = tx.blocking_send(Message::Finished);
            }
            Ok(None) => {
                tracing::trace!(
                    target: TRACING_TARGET_LOADER,
                    epoch = self.epoch,
                    "Consumer dropped the epoch"
                );
            }
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET_LOADER,
                    epoch = self.epoch,
                    error = %error,
                    "Batch producer failed"
                );
                let _ = tx.blocking_send(Message::Failed(error));
            }
        }
    }

    /// Returns the batches and rows sent, or `None` once the consumer is
    /// gone.
    ///
    /// At most `buffer_size` partitions are held at once; the next one is
    /// read only after the current working set has been sent.
    fn produce(&self, tx: &mpsc::Sender<Message>) -> LoaderResult<Option<(usize, usize)>> {
        let seed = self.config.seed.wrapping_add(self.epoch);
        let order = self.dataset.file_order(self.config.shuffle.then_some(seed));
        let mut rng = StdRng::seed_from_u64(seed);

        let mut working_set = Vec::with_capacity(self.config.buffer_size);
        let mut sent = (0, 0);
        let mut warned = false;

        for part in self.dataset.partitions_in(order) {
            let part = match &self.transform {
                Some(transform) => transform.apply(&part?)?,
                None => part?,
            };
            working_set.push(part);

            if working_set.len() == self.config.buffer_size
                && !self.send_working_set(&mut working_set, &mut rng, &mut warned, &mut sent, tx)?
            {
                return Ok(None);
            }
        }

        if !working_set.is_empty()
            && !self.send_working_set(&mut working_set, &mut rng, &mut warned, &mut sent, tx)?
        {
            return Ok(None);
        }
        Ok(Some(sent))
    }

    /// Merges, shuffles and sends one working set. Returns false once the
    /// consumer is gone.
    fn send_working_set(
        &self,
        working_set: &mut Vec<Partition>,
        rng: &mut StdRng,
        warned: &mut bool,
        (batches, rows): &mut (usize, usize),
        tx: &mpsc::Sender<Message>,
    ) -> LoaderResult<bool> {
        let merged = Partition::concat(working_set)?;
        working_set.clear();
        if !*warned && merged.estimated_bytes() as u64 > self.working_set_budget {
            tracing::warn!(
                target: TRACING_TARGET_LOADER,
                bytes = merged.estimated_bytes(),
                budget = self.working_set_budget,
                "Working set exceeds the memory budget"
            );
            *warned = true;
        }

        let merged = if self.config.shuffle {
            let mut indices: Vec<usize> = (0..merged.num_rows()).collect();
            indices.shuffle(rng);
            merged.take(&indices)
        } else {
            merged
        };

        for chunk in merged.chunks(self.config.batch_size) {
            let batch = Batch::from_partition(&chunk, &self.features)?;
            *rows += batch.num_rows();
            *batches += 1;
            if tx.blocking_send(Message::Batch(batch)).is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Batches of one epoch, in production order.
///
/// Iterating blocks until the producer delivers the next batch, and panics
/// when called from within a tokio runtime; use [`Epoch::into_stream`] there. A producer
/// error is yielded once and ends the epoch; a producer that stops without
/// finishing yields a producer-failed error instead of hanging. Dropping
/// the epoch stops its producer.
pub struct Epoch {
    index: u64,
    rx: mpsc::Receiver<Message>,
    handle: Option<JoinHandle<()>>,
    done: bool,
}

impl Epoch {
    /// Returns the epoch index.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Converts the epoch into an async stream.
    pub fn into_stream(self) -> impl Stream<Item = LoaderResult<Batch>> + Send {
        futures::stream::unfold(self, |mut epoch| async move {
            if epoch.done {
                return None;
            }
            let message = epoch.rx.recv().await;
            epoch.receive(message).map(|item| (item, epoch))
        })
    }

    fn receive(&mut self, message: Option<Message>) -> Option<LoaderResult<Batch>> {
        match message {
            Some(Message::Batch(batch)) => Some(Ok(batch)),
            Some(Message::Failed(error)) => {
                self.done = true;
                Some(Err(error))
            }
            Some(Message::Finished) => {
                self.done = true;
                None
            }
            None => {
                self.done = true;
                Some(Err(self.producer_died()))
            }
        }
    }

    fn producer_died(&mut self) -> LoaderError {
        let reason = match self.handle.take().map(JoinHandle::join) {
            Some(Err(_)) => "the producer thread panicked",
            _ => "the producer stopped before finishing the epoch",
        };
        LoaderError::ProducerFailed(format!("epoch {}: {reason}", self.index))
    }
}

impl Iterator for Epoch {
    type Item = LoaderResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let message = self.rx.blocking_recv();
        self.receive(message)
    }
}

impl Drop for Epoch {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::StreamExt;
    use tabflow_core::io::{PartitionFileWriter, ReaderOptions, write_partition};
    use tabflow_core::{Column, ErrorKind, MemoryConfig};
    use tabflow_runtime::ops::Operator;
    use tabflow_runtime::workflow::{Step, Workflow, WorkflowDefinition};

    use super::*;
    use crate::config::LoaderConfigBuilder;

    fn device() -> DeviceContext {
        DeviceContext::initialize(MemoryConfig::new(1 << 30)).unwrap()
    }

    fn rows(start: usize, len: usize) -> Partition {
        Partition::new(vec![
            Column::float("x", (start..start + len).map(|i| i as f64).collect::<Vec<_>>()),
            Column::int("y", (start..start + len).map(|i| (i % 5) as i64).collect::<Vec<_>>()),
        ])
        .unwrap()
    }

    fn dataset(dir: &Path, parts: &[Partition]) -> Dataset {
        for (i, part) in parts.iter().enumerate() {
            write_partition(dir.join(format!("part_{i}.tfp")), part).unwrap();
        }
        Dataset::open(dir.to_str().unwrap(), &device(), ReaderOptions::new()).unwrap()
    }

    fn features() -> ColumnManifest {
        ColumnManifest::new().with_continuous(["x"]).with_label(["y"])
    }

    fn config(batch_size: usize, shuffle: bool) -> LoaderConfig {
        LoaderConfigBuilder::default()
            .batch_size(batch_size)
            .shuffle(shuffle)
            .buffer_size(3usize)
            .prefetch(1usize)
            .seed(7u64)
            .build()
            .unwrap()
    }

    fn loader(data: Dataset, config: LoaderConfig) -> StreamingLoader {
        StreamingLoader::new(data, features(), config, &device()).unwrap()
    }

    fn xs(batches: &[Batch]) -> Vec<f32> {
        batches
            .iter()
            .flat_map(|b| b.require("x").unwrap().to_f32())
            .collect()
    }

    #[test]
    fn test_batches_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &[rows(0, 100)]);
        let mut loader = loader(data, config(32, false));

        let batches: Vec<Batch> = loader.epoch().unwrap().collect::<LoaderResult<_>>().unwrap();
        let sizes: Vec<usize> = batches.iter().map(Batch::num_rows).collect();
        assert_eq!(sizes, [32, 32, 32, 4]);
        assert_eq!(xs(&batches), (0..100).map(|i| i as f32).collect::<Vec<_>>());
        assert_eq!(loader.num_rows().unwrap(), 100);
        assert_eq!(loader.num_batches().unwrap(), 4);
    }

    #[test]
    fn test_batch_count_follows_row_groups() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            PartitionFileWriter::create(dir.path().join("part_0.tfp"), rows(0, 1).schema()).unwrap();
        for start in [0, 3, 6] {
            writer.append(&rows(start, 3)).unwrap();
        }
        writer.finish().unwrap();
        let data = Dataset::open(
            dir.path().to_str().unwrap(),
            &device(),
            ReaderOptions::new().with_part_size(4),
        )
        .unwrap();
        let config = LoaderConfigBuilder::default()
            .batch_size(3usize)
            .buffer_size(1usize)
            .build()
            .unwrap();
        let mut loader = loader(data, config);

        assert_eq!(loader.num_batches().unwrap(), 4);
        let sizes: Vec<usize> = loader.epoch().unwrap().map(|b| b.unwrap().num_rows()).collect();
        assert_eq!(sizes, [3, 1, 2, 3]);
    }

    #[test]
    fn test_batch_count_matches_shuffled_epochs() {
        let dir = tempfile::tempdir().unwrap();
        let parts: Vec<Partition> = [7, 3, 12, 5, 9]
            .iter()
            .scan(0, |start, &len| {
                let part = rows(*start, len);
                *start += len;
                Some(part)
            })
            .collect();
        let data = dataset(dir.path(), &parts).with_part_size(4);
        let config = LoaderConfigBuilder::default()
            .batch_size(3usize)
            .buffer_size(2usize)
            .shuffle(true)
            .seed(3u64)
            .build()
            .unwrap();
        let mut loader = loader(data, config);

        for _ in 0..4 {
            let expected = loader.num_batches().unwrap();
            assert_eq!(loader.epoch().unwrap().count(), expected);
        }
    }

    #[test]
    fn test_shuffle_stays_within_working_set() {
        let dir = tempfile::tempdir().unwrap();
        let parts: Vec<Partition> = (0..5)
            .map(|file| {
                Partition::new(vec![
                    Column::float("x", (0..6).map(|i| (file * 6 + i) as f64).collect::<Vec<_>>()),
                    Column::int("y", vec![file as i64; 6]),
                ])
                .unwrap()
            })
            .collect();
        let data = dataset(dir.path(), &parts);
        let config = LoaderConfigBuilder::default()
            .batch_size(4usize)
            .buffer_size(2usize)
            .shuffle(true)
            .seed(11u64)
            .build()
            .unwrap();
        let mut loader = loader(data, config);

        for _ in 0..3 {
            let batches: Vec<Batch> = loader.epoch().unwrap().collect::<LoaderResult<_>>().unwrap();
            let origin: Vec<i64> = batches
                .iter()
                .flat_map(|b| b.require("y").unwrap().as_i64().unwrap().to_vec())
                .collect();
            assert_eq!(origin.len(), 30);

            let mut seen = Vec::new();
            for window in origin.chunks(12) {
                let mut files = window.to_vec();
                files.sort_unstable();
                files.dedup();
                assert!(files.len() <= 2, "window mixes files {files:?}");
                assert!(files.iter().all(|f| !seen.contains(f)));
                seen.extend(files);
            }
            assert_eq!(seen.len(), 5);
        }
    }

    #[test]
    fn test_producer_waits_for_the_consumer() {
        let dir = tempfile::tempdir().unwrap();
        let parts: Vec<Partition> = (0..10).map(|i| rows(i * 10, 10)).collect();
        let data = dataset(dir.path(), &parts);

        let values_read = Arc::new(AtomicUsize::new(0));
        let counter = values_read.clone();
        let definition = WorkflowDefinition::new(features()).with_step(Step::new(
            "x",
            [Operator::lambda("count", move |x| {
                counter.fetch_add(1, Ordering::SeqCst);
                x
            })],
        ));
        let transform =
            InlineTransform::new(Workflow::compile(&definition).unwrap().into(), None).unwrap();

        let config = LoaderConfigBuilder::default()
            .batch_size(10usize)
            .buffer_size(1usize)
            .prefetch(1usize)
            .build()
            .unwrap();
        let mut loader = loader(data, config).with_transform(transform).unwrap();

        let mut epoch = loader.epoch().unwrap();
        assert!(epoch.next().unwrap().is_ok());
        std::thread::sleep(Duration::from_millis(200));
        // One batch consumed, one queued and one working set waiting to send.
        assert!(values_read.load(Ordering::SeqCst) <= 30);

        assert_eq!(epoch.count(), 9);
        assert_eq!(values_read.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_small_partition_is_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &[rows(0, 10)]);
        let mut loader = loader(data, config(32, true));

        let batches: Vec<Batch> = loader.epoch().unwrap().collect::<LoaderResult<_>>().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 10);
    }

    #[test]
    fn test_shuffle_is_seeded_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &[rows(0, 20), rows(20, 20), rows(40, 20)]);

        let run = |epochs: usize| {
            let mut loader = loader(data.clone(), config(16, true));
            (0..epochs)
                .map(|_| {
                    let batches: Vec<Batch> =
                        loader.epoch().unwrap().collect::<LoaderResult<_>>().unwrap();
                    xs(&batches)
                })
                .collect::<Vec<_>>()
        };

        let first = run(2);
        assert_eq!(first, run(2));
        assert_ne!(first[0], first[1]);

        for epoch in &first {
            let mut sorted = epoch.clone();
            sorted.sort_by(f32::total_cmp);
            assert_eq!(sorted, (0..60).map(|i| i as f32).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_epochs_restart() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &[rows(0, 50), rows(50, 50)]);
        let mut loader = loader(data, config(25, false));

        let first: Vec<Batch> = loader.epoch().unwrap().collect::<LoaderResult<_>>().unwrap();
        let second: Vec<Batch> = loader.epoch().unwrap().collect::<LoaderResult<_>>().unwrap();
        assert_eq!(first, second);
        assert_eq!(loader.epochs_started(), 2);
    }

    #[test]
    fn test_read_error_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &[rows(0, 10), rows(10, 10)]);
        let mut contents = std::fs::read_to_string(&data.files()[1]).unwrap();
        contents.push_str("{\"truncated\n");
        std::fs::write(&data.files()[1], contents).unwrap();

        let config = LoaderConfigBuilder::default().batch_size(5usize).build().unwrap();
        let mut loader = loader(data, config);
        let items: Vec<LoaderResult<Batch>> = loader.epoch().unwrap().collect();

        let (last, delivered) = items.split_last().unwrap();
        assert!(delivered.iter().all(Result::is_ok));
        assert_eq!(delivered.len(), 2);
        assert_eq!(last.as_ref().unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_dead_producer_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &[rows(0, 10)]);
        let definition = WorkflowDefinition::new(features())
            .with_step(Step::new("x", [Operator::lambda("boom", |_| panic!("boom"))]));
        let transform =
            InlineTransform::new(Workflow::compile(&definition).unwrap().into(), None).unwrap();

        let mut loader = loader(data, config(4, false)).with_transform(transform).unwrap();
        let items: Vec<LoaderResult<Batch>> = loader.epoch().unwrap().collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(LoaderError::ProducerFailed(_))));
    }

    #[test]
    fn test_inline_transform() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &[rows(0, 10)]);
        let definition = WorkflowDefinition::new(features()).with_step(Step::new(
            "y",
            [Operator::Remap {
                mapping: BTreeMap::from([("4".to_owned(), 0)]),
                default: 1,
            }],
        ));
        let transform =
            InlineTransform::new(Workflow::compile(&definition).unwrap().into(), None).unwrap();

        let mut loader = loader(data, config(10, false)).with_transform(transform).unwrap();
        let batch = loader.epoch().unwrap().next().unwrap().unwrap();
        assert_eq!(
            batch.require("y").unwrap().as_i64().unwrap(),
            [1, 1, 1, 1, 0, 1, 1, 1, 1, 0]
        );
    }

    #[test]
    fn test_missing_feature() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &[rows(0, 10)]);
        let features = features().with_categorical(["Breed"]);
        let error = StreamingLoader::new(data, features, LoaderConfig::default(), &device())
            .err()
            .unwrap();
        assert!(matches!(error, LoaderError::MissingFeature { ref feature } if feature == "Breed"));
    }

    #[test]
    fn test_dropping_an_epoch_stops_the_producer() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &[rows(0, 100)]);
        let mut loader = loader(data, config(1, false));

        let mut epoch = loader.epoch().unwrap();
        assert!(epoch.next().unwrap().is_ok());
        drop(epoch);

        let batches = loader.epoch().unwrap().count();
        assert_eq!(batches, 100);
    }

    #[tokio::test]
    async fn test_stream() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &[rows(0, 70)]);
        let mut loader = loader(data, config(32, false));

        let sizes: Vec<usize> = loader
            .stream()
            .unwrap()
            .map(|batch| batch.unwrap().num_rows())
            .collect()
            .await;
        assert_eq!(sizes, [32, 32, 6]);
    }
}
