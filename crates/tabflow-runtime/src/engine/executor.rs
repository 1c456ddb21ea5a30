//! Fit/transform engine.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use jiff::Timestamp;
use tabflow_core::io::{
    DEFAULT_PART_MEM_FRACTION, Dataset, DatasetMetadata, DatasetWriter, WriterOptions,
    is_output_file, prepare_output_dir,
};
use tabflow_core::{ColumnManifest, DeviceContext, Partition};

use super::inline::InlineTransform;
use super::output::{TransformOptions, TransformSummary};
use super::EngineConfig;
use crate::TRACING_TARGET_ENGINE;
use crate::error::{RuntimeError, RuntimeResult};
use crate::stats::Statistics;
use crate::workflow::{Workflow, WorkflowDefinition};

/// Executes a workflow over datasets.
///
/// The engine owns the compiled workflow and, once fit, its statistics.
/// Statistics are replaced only by [`fit`](Self::fit),
/// [`load_stats`](Self::load_stats) and [`clear_stats`](Self::clear_stats);
/// every pass in between reads them through a shared `Arc`.
pub struct Engine {
    config: EngineConfig,
    workflow: Arc<Workflow>,
    stats: Option<Arc<Statistics>>,
    partition_budget: u64,
}

impl Engine {
    /// Creates an engine for a compiled workflow.
    ///
    /// Requires the resolved device context, so the memory reservation is
    /// fixed before the engine allocates anything.
    pub fn new(workflow: Workflow, config: EngineConfig, device: &DeviceContext) -> Self {
        let partition_budget = device.partition_budget(DEFAULT_PART_MEM_FRACTION);

        tracing::info!(
            target: TRACING_TARGET_ENGINE,
            num_workers = config.num_workers,
            fit_passes = workflow.fit_passes(),
            fingerprint = %workflow.fingerprint(),
            partition_budget,
            "Workflow engine initialized"
        );

        Self {
            config,
            workflow: Arc::new(workflow),
            stats: None,
            partition_budget,
        }
    }

    /// Compiles a definition and creates an engine for it.
    pub fn from_definition(
        definition: &WorkflowDefinition,
        config: EngineConfig,
        device: &DeviceContext,
    ) -> RuntimeResult<Self> {
        Ok(Self::new(Workflow::compile(definition)?, config, device))
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the compiled workflow.
    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    /// Returns the current statistics.
    pub fn statistics(&self) -> Option<&Arc<Statistics>> {
        self.stats.as_ref()
    }

    /// Returns true if the workflow can be applied.
    pub fn is_fit(&self) -> bool {
        self.stats.is_some() || !self.workflow.is_stateful()
    }

    /// Returns the output columns and their roles after every operator.
    pub fn final_columns(&self) -> &ColumnManifest {
        self.workflow.final_columns()
    }

    /// Computes the statistics of every stateful operator.
    ///
    /// Operators are fit level by level: one streaming pass per level of
    /// chained stateful operators, a single pass when no stateful operator
    /// depends on another. At most one partition per worker is in memory.
    pub fn fit(&mut self, dataset: &Dataset) -> RuntimeResult<Arc<Statistics>> {
        let started = Instant::now();
        self.workflow.output_schema(dataset.schema())?;

        let mut entries = BTreeMap::new();
        let mut num_rows = 0;
        for level in 0..self.workflow.fit_passes() {
            let partial = Statistics::new(
                self.workflow.fingerprint().to_owned(),
                self.workflow.manifest().clone(),
                num_rows,
                entries.clone(),
            );

            let states = self.run_workers(dataset, |worker, shard| {
                let mut state = self
                    .workflow
                    .fit_state(level, self.config.seed ^ worker_seed(worker));
                for part in shard.partitions() {
                    self.workflow.observe(&part?, Some(&partial), &mut state)?;
                }
                Ok(state)
            })?;

            let mut states = states.into_iter();
            let Some(mut merged) = states.next() else {
                return Err(RuntimeError::Internal("fit pass ran no workers".into()));
            };
            for state in states {
                merged.merge(state);
            }
            if level == 0 {
                num_rows = merged.rows();
            }
            merged.finish_into(&mut entries);

            tracing::debug!(
                target: TRACING_TARGET_ENGINE,
                pass = level,
                statistics = entries.len(),
                "Fit pass completed"
            );
        }

        let stats = Arc::new(Statistics::new(
            self.workflow.fingerprint().to_owned(),
            self.workflow.manifest().clone(),
            num_rows,
            entries,
        ));
        self.stats = Some(Arc::clone(&stats));

        tracing::info!(
            target: TRACING_TARGET_ENGINE,
            fit_id = %stats.fit_id(),
            passes = self.workflow.fit_passes(),
            rows = num_rows,
            statistics = stats.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Workflow fit"
        );
        Ok(stats)
    }

    /// Applies the workflow to every partition and writes the result.
    ///
    /// Schema and statistics are checked before any data is read. Workers
    /// split the files, share the statistics and write their own files.
    pub fn transform(
        &self,
        dataset: &Dataset,
        options: &TransformOptions,
    ) -> RuntimeResult<TransformSummary> {
        let started = Instant::now();
        options.validate()?;
        let schema = self.workflow.output_schema(dataset.schema())?;
        for name in options.dtypes.keys() {
            if !schema.contains(name) {
                return Err(RuntimeError::unknown_column(name, "the dtypes option"));
            }
        }
        let stats = self.applicable_stats()?;
        check_output_dir(dataset, &options.path)?;
        prepare_output_dir(&options.path)?;

        let writer_options = WriterOptions {
            out_files: options.out_files_per_worker,
            shuffle: options.shuffle,
            seed: self.config.seed,
            num_io_threads: options.num_io_threads,
        };

        let results = self.run_workers(dataset, |worker, shard| {
            let mut writer = DatasetWriter::new(&options.path, worker, writer_options.clone())?;
            let seed = options.shuffle.map(|_| self.config.seed ^ worker_seed(worker));
            let mut partitions = 0;
            let mut warned = false;

            for part in shard.partitions_in(shard.file_order(seed)) {
                let part = part?;
                if !warned && part.estimated_bytes() as u64 > self.partition_budget {
                    tracing::warn!(
                        target: TRACING_TARGET_ENGINE,
                        worker,
                        bytes = part.estimated_bytes(),
                        budget = self.partition_budget,
                        "Partition exceeds the memory budget"
                    );
                    warned = true;
                }

                let out = self
                    .workflow
                    .apply(&part, stats)?
                    .cast(options.dtypes.iter().map(|(name, dtype)| (name.as_str(), *dtype)))?;
                writer.write(&out)?;
                partitions += 1;
            }

            let files = writer.finish()?;
            tracing::debug!(
                target: TRACING_TARGET_ENGINE,
                worker,
                partitions,
                files = files.len(),
                "Transform worker finished"
            );
            Ok((files, partitions))
        })?;

        let mut files = Vec::new();
        let mut num_partitions = 0;
        for (worker_files, partitions) in results {
            files.extend(worker_files);
            num_partitions += partitions;
        }
        let num_rows = files.iter().map(|f| f.num_rows).sum();

        let columns = self.workflow.final_columns();
        let metadata = DatasetMetadata {
            created_at: Timestamp::now(),
            files: files.clone(),
            num_rows,
            categorical: columns.categorical.clone(),
            continuous: columns.continuous.clone(),
            label: columns.label.clone(),
        };
        if options.write_metadata {
            metadata.write(&options.path)?;
        }

        let elapsed = started.elapsed();
        tracing::info!(
            target: TRACING_TARGET_ENGINE,
            path = %options.path.display(),
            files = files.len(),
            rows = num_rows,
            partitions = num_partitions,
            elapsed_ms = elapsed.as_millis() as u64,
            "Dataset transformed"
        );

        Ok(TransformSummary {
            files,
            num_rows,
            num_partitions,
            elapsed,
            metadata,
        })
    }

    /// Fits the workflow and then transforms the same dataset.
    pub fn fit_transform(
        &mut self,
        dataset: &Dataset,
        options: &TransformOptions,
    ) -> RuntimeResult<TransformSummary> {
        self.fit(dataset)?;
        self.transform(dataset, options)
    }

    /// Applies the workflow to a single partition in memory.
    pub fn apply_inline(&self, part: &Partition) -> RuntimeResult<Partition> {
        self.workflow.apply(part, self.applicable_stats()?)
    }

    /// Returns an immutable handle applying the workflow with the current
    /// statistics, for use by a loader.
    pub fn inline_transform(&self) -> RuntimeResult<InlineTransform> {
        InlineTransform::new(Arc::clone(&self.workflow), self.stats.clone())
    }

    /// Writes the current statistics as JSON.
    pub fn save_stats(&self, path: impl AsRef<Path>) -> RuntimeResult<()> {
        match &self.stats {
            Some(stats) => stats.save(path),
            None => Err(RuntimeError::UnfitStatistics(
                "there are no statistics to save; call fit first".into(),
            )),
        }
    }

    /// Loads statistics saved for this workflow.
    ///
    /// Fails if they were fit for a different workflow definition.
    pub fn load_stats(&mut self, path: impl AsRef<Path>) -> RuntimeResult<Arc<Statistics>> {
        let stats = Statistics::load(path)?;
        self.set_statistics(stats)
    }

    /// Replaces the statistics after checking they belong to this workflow.
    pub fn set_statistics(&mut self, stats: Statistics) -> RuntimeResult<Arc<Statistics>> {
        if stats.fingerprint() != self.workflow.fingerprint() {
            return Err(RuntimeError::InvalidDefinition(format!(
                "statistics were fit for workflow {} but this workflow is {}",
                stats.fingerprint(),
                self.workflow.fingerprint()
            )));
        }
        let stats = Arc::new(stats);
        self.stats = Some(Arc::clone(&stats));
        Ok(stats)
    }

    /// Drops the statistics; stateful workflows must be fit again.
    pub fn clear_stats(&mut self) {
        if let Some(stats) = self.stats.take() {
            tracing::debug!(
                target: TRACING_TARGET_ENGINE,
                fit_id = %stats.fit_id(),
                "Statistics cleared"
            );
        }
    }

    fn applicable_stats(&self) -> RuntimeResult<Option<&Statistics>> {
        match (&self.stats, self.workflow.is_stateful()) {
            (Some(stats), _) => Ok(Some(stats)),
            (None, false) => Ok(None),
            (None, true) => Err(RuntimeError::UnfitStatistics(
                "the workflow has stateful operators; call fit or load_stats first".into(),
            )),
        }
    }

    /// Runs `task` once per worker over disjoint shards of `dataset` and
    /// returns the results in worker order.
    fn run_workers<T, F>(&self, dataset: &Dataset, task: F) -> RuntimeResult<Vec<T>>
    where
        T: Send,
        F: Fn(usize, Dataset) -> RuntimeResult<T> + Sync,
    {
        let workers = self.config.num_workers.min(dataset.num_files()).max(1);
        if workers == 1 {
            return Ok(vec![task(0, dataset.clone())?]);
        }

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let shard = dataset.shard(worker, workers);
                    let task = &task;
                    scope.spawn(move || task(worker, shard))
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| {
                    handle.join().map_err(|_| {
                        RuntimeError::Internal(format!("worker {worker} panicked"))
                    })?
                })
                .collect()
        })
    }
}

/// Fails when clearing `dir` would delete one of the input files.
fn check_output_dir(dataset: &Dataset, dir: &Path) -> RuntimeResult<()> {
    let Ok(dir) = dir.canonicalize() else {
        return Ok(());
    };
    for file in dataset.files() {
        let parent = file.parent().and_then(|p| p.canonicalize().ok());
        if parent.as_deref() == Some(dir.as_path()) && is_output_file(file) {
            return Err(tabflow_core::Error::configuration()
                .with_message(format!(
                    "output directory {} holds input file {}",
                    dir.display(),
                    file.display()
                ))
                .into());
        }
    }
    Ok(())
}

fn worker_seed(worker: usize) -> u64 {
    (worker as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use tabflow_core::io::{DatasetMetadata, ReaderOptions, Shuffle, read_partition, write_partition};
    use tabflow_core::{Column, ColumnKind, ErrorKind, MemoryConfig};

    use super::*;
    use crate::EngineConfigBuilder;
    use crate::ops::{Operator, OperatorId};
    use crate::stats::Statistic;
    use crate::workflow::Step;

    fn device() -> DeviceContext {
        DeviceContext::initialize(MemoryConfig::new(1 << 30)).unwrap()
    }

    fn pets(ages: &[f64], types: &[&str], speeds: &[i64]) -> Partition {
        Partition::new(vec![
            Column::float("Age", ages.to_vec()),
            Column::str("Type", types.iter().copied()),
            Column::int("AdoptionSpeed", speeds.to_vec()),
        ])
        .unwrap()
    }

    /// Writes `parts` as one file each and opens them as a dataset.
    fn dataset(dir: &Path, parts: &[Partition]) -> Dataset {
        std::fs::create_dir_all(dir).unwrap();
        for (i, part) in parts.iter().enumerate() {
            write_partition(dir.join(format!("part_{i}.tfp")), part).unwrap();
        }
        Dataset::open(dir.to_str().unwrap(), &device(), ReaderOptions::new()).unwrap()
    }

    fn train_parts() -> Vec<Partition> {
        vec![
            pets(&[1.0, 3.0, 12.0], &["Cat", "Dog", "Cat"], &[0, 1, 4]),
            pets(&[24.0, 2.0, 6.0], &["Dog", "Dog", "Cat"], &[2, 3, 4]),
        ]
    }

    fn manifest() -> ColumnManifest {
        ColumnManifest::new()
            .with_continuous(["Age"])
            .with_categorical(["Type"])
            .with_label(["AdoptionSpeed"])
    }

    fn remap_label() -> Step {
        Step::new(
            "AdoptionSpeed",
            [Operator::Remap {
                mapping: BTreeMap::from([("4".to_owned(), 0)]),
                default: 1,
            }],
        )
    }

    fn petfinder() -> WorkflowDefinition {
        WorkflowDefinition::new(manifest())
            .with_step(Step::new(ColumnKind::Continuous, [Operator::NormalizeMinmax]))
            .with_step(Step::new(ColumnKind::Categorical, [Operator::categorify()]))
            .with_step(remap_label())
    }

    fn engine(def: &WorkflowDefinition, num_workers: usize) -> Engine {
        let config = EngineConfigBuilder::default()
            .num_workers(num_workers)
            .seed(42u64)
            .build()
            .unwrap();
        Engine::from_definition(def, config, &device()).unwrap()
    }

    fn floats(part: &Partition, name: &str) -> Vec<f64> {
        part.column(name).unwrap().values().as_float().unwrap().to_vec()
    }

    fn ints(part: &Partition, name: &str) -> Vec<i64> {
        part.column(name).unwrap().values().as_int().unwrap().to_vec()
    }

    #[test]
    fn test_age_extremes_map_to_normalized_extremes() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &train_parts());

        for op in [Operator::NormalizeMinmax, Operator::Normalize] {
            let def = WorkflowDefinition::new(manifest())
                .with_step(Step::new("Age", [op]));
            let mut engine = engine(&def, 1);
            engine.fit(&data).unwrap();

            let probe = pets(&[1.0, 24.0, 6.0], &["Cat", "Cat", "Cat"], &[0, 0, 0]);
            let out = engine.apply_inline(&probe).unwrap();
            let age = floats(&out, "Age");

            let all = engine
                .apply_inline(&Partition::concat(&train_parts()).unwrap())
                .unwrap();
            let all = floats(&all, "Age");
            let min = all.iter().copied().fold(f64::INFINITY, f64::min);
            let max = all.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            assert_eq!(age[0], min);
            assert_eq!(age[1], max);
            assert!(age[2] > min && age[2] < max);
        }
    }

    #[test]
    fn test_type_vocabulary_with_oov() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &train_parts());
        let mut engine = engine(&petfinder(), 1);
        let stats = engine.fit(&data).unwrap();

        let Some(Statistic::Vocabulary { tokens }) = stats.get(OperatorId::new(1, 0), "Type") else {
            panic!("expected a vocabulary");
        };
        assert_eq!(tokens.len(), 2);

        let probe = pets(&[1.0, 1.0, 1.0], &["Cat", "Dog", "Hamster"], &[0, 0, 0]);
        let out = engine.apply_inline(&probe).unwrap();
        assert_eq!(ints(&out, "Type"), [0, 1, 2]);
    }

    #[test]
    fn test_label_remap() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &train_parts());
        let mut engine = engine(&petfinder(), 1);
        engine.fit(&data).unwrap();

        let probe = pets(&[1.0; 5], &["Cat"; 5], &[0, 1, 2, 3, 4]);
        let out = engine.apply_inline(&probe).unwrap();
        assert_eq!(ints(&out, "AdoptionSpeed"), [1, 1, 1, 1, 0]);
    }

    #[test]
    fn test_transform_before_fit() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(&dir.path().join("in"), &train_parts());
        let engine = engine(&petfinder(), 1);
        let out = dir.path().join("out");

        let error = engine.transform(&data, &TransformOptions::new(&out)).unwrap_err();
        assert!(matches!(error, RuntimeError::UnfitStatistics(_)));
        assert_eq!(error.kind(), ErrorKind::Sequencing);
        assert!(!out.exists());

        let probe = &train_parts()[0];
        assert!(matches!(
            engine.apply_inline(probe).unwrap_err(),
            RuntimeError::UnfitStatistics(_)
        ));
        assert!(engine.inline_transform().is_err());
    }

    #[test]
    fn test_unknown_column_fails_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &train_parts());
        // Corrupt the data but not the header.
        for file in data.files() {
            let mut contents = std::fs::read_to_string(file).unwrap();
            contents.push_str("not a row group\n");
            std::fs::write(file, contents).unwrap();
        }

        let def = WorkflowDefinition::new(manifest().with_categorical(["Type", "Breed"]));
        let mut engine = engine(&def, 1);
        let error = engine.fit(&data).unwrap_err();
        assert!(matches!(error, RuntimeError::UnknownColumn { ref column, .. } if column == "Breed"));
        assert_eq!(error.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_type_mismatch_fails_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &train_parts());
        let def = WorkflowDefinition::new(manifest())
            .with_step(Step::new("Type", [Operator::Log]));
        let mut engine = engine(&def, 1);
        assert!(matches!(
            engine.fit(&data).unwrap_err(),
            RuntimeError::ColumnTypeMismatch { .. }
        ));
    }

    #[test]
    fn test_corrupt_file_surfaces_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path(), &train_parts());
        let mut contents = std::fs::read_to_string(&data.files()[1]).unwrap();
        contents.push_str("{\"broken\n");
        std::fs::write(&data.files()[1], contents).unwrap();

        let mut engine = engine(&petfinder(), 1);
        let error = engine.fit(&data).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Io);
        assert!(engine.statistics().is_none());
    }

    #[test]
    fn test_fit_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let parts: Vec<Partition> = (0..4)
            .map(|i| {
                let ages: Vec<f64> = (0..50)
                    .map(|j| if j % 7 == 0 { f64::NAN } else { f64::from(i * 50 + j) })
                    .collect();
                let types = vec!["Cat"; 50];
                let speeds = vec![1; 50];
                pets(&ages, &types, &speeds)
            })
            .collect();
        let data = dataset(dir.path(), &parts);

        let def = WorkflowDefinition::new(manifest()).with_step(Step::new(
            "Age",
            [Operator::FillMedian { sample_size: 16 }, Operator::Normalize],
        ));

        let run = || {
            let mut engine = engine(&def, 2);
            let stats = engine.fit(&data).unwrap();
            let entries: Vec<(OperatorId, String, Statistic)> = stats
                .iter()
                .map(|(id, column, stat)| (id, column.to_owned(), stat.clone()))
                .collect();
            let out = engine.apply_inline(&parts[0]).unwrap();
            (entries, floats(&out, "Age"))
        };

        let (first_stats, first_out) = run();
        let (second_stats, second_out) = run();
        assert_eq!(first_stats, second_stats);
        assert_eq!(first_out, second_out);
        assert_eq!(first_stats.len(), 2);
        assert!(first_out.iter().all(|x| !x.is_nan()));
    }

    #[test]
    fn test_transform_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(&dir.path().join("in"), &train_parts());
        let mut engine = engine(&petfinder(), 2);
        engine.fit(&data).unwrap();

        let write = |name: &str| -> Vec<(PathBuf, Vec<u8>)> {
            let options = TransformOptions::new(dir.path().join(name))
                .with_shuffle(Shuffle::PerWorker)
                .with_out_files_per_worker(2);
            let summary = engine.transform(&data, &options).unwrap();
            assert_eq!(summary.num_rows, 6);
            summary
                .files
                .iter()
                .map(|f| (f.path.file_name().unwrap().into(), std::fs::read(&f.path).unwrap()))
                .collect()
        };

        let first = write("a");
        let second = write("b");
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
    }

    #[test]
    fn test_transform_writes_metadata_and_casts() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(&dir.path().join("in"), &train_parts());
        let mut engine = engine(&petfinder(), 1);
        let out = dir.path().join("out");

        let options = TransformOptions::new(&out).with_dtype("AdoptionSpeed", tabflow_core::DType::Float);
        let summary = engine.fit_transform(&data, &options).unwrap();
        assert_eq!(summary.num_partitions, 2);

        let metadata = DatasetMetadata::read(&out).unwrap();
        assert_eq!(metadata.num_rows, 6);
        assert_eq!(metadata.continuous, ["Age"]);
        assert_eq!(metadata.categorical, ["Type"]);
        assert_eq!(metadata.label, ["AdoptionSpeed"]);

        let part = read_partition(&summary.files[0].path).unwrap();
        assert_eq!(floats(&part, "AdoptionSpeed"), [1.0, 1.0, 0.0, 1.0, 1.0, 0.0]);
        assert_eq!(ints(&part, "Type"), [0, 1, 0, 1, 1, 0]);

        let bad = TransformOptions::new(&out).with_dtype("Breed", tabflow_core::DType::Int);
        assert!(matches!(
            engine.transform(&data, &bad).unwrap_err(),
            RuntimeError::UnknownColumn { .. }
        ));
    }

    #[test]
    fn test_rerun_replaces_earlier_output() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(&dir.path().join("in"), &train_parts());
        let out = dir.path().join("out");

        let mut wide = engine(&petfinder(), 2);
        let options = TransformOptions::new(&out).with_out_files_per_worker(2);
        assert_eq!(wide.fit_transform(&data, &options).unwrap().files.len(), 4);

        let mut narrow = engine(&petfinder(), 1);
        let options = TransformOptions::new(&out).with_num_io_threads(2);
        let summary = narrow.fit_transform(&data, &options).unwrap();
        assert_eq!(summary.files.len(), 1);

        let reread = Dataset::open(out.to_str().unwrap(), &device(), ReaderOptions::new()).unwrap();
        assert_eq!(reread.num_files(), 1);
        assert_eq!(reread.num_rows().unwrap(), 6);
        assert_eq!(DatasetMetadata::read(&out).unwrap().files.len(), 1);
    }

    #[test]
    fn test_output_into_input_dir_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let data = dataset(&input, &train_parts());
        let mut engine = engine(&petfinder(), 1);
        engine.fit(&data).unwrap();

        let error = engine
            .transform(&data, &TransformOptions::new(&input))
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert_eq!(data.num_rows().unwrap(), 6);
    }

    fn noisy(offset: usize) -> Partition {
        let rows = offset..offset + 40;
        let age: Vec<f64> = rows
            .clone()
            .map(|i| match i % 13 {
                5 => f64::INFINITY,
                9 => f64::NAN,
                _ => (i as f64 * 0.713).sin() * 17.3,
            })
            .collect();
        let fee: Vec<f64> = rows.clone().map(|i| (i as f64).sqrt() / 3.0).collect();
        Partition::new(vec![
            Column::float("Age", age),
            Column::float("Fee", fee),
            Column::str("Type", rows.clone().map(|i| if i % 3 == 0 { "Cat" } else { "Dog" })),
            Column::int("AdoptionSpeed", rows.map(|i| (i % 5) as i64).collect::<Vec<_>>()),
        ])
        .unwrap()
    }

    fn float_bits(part: &Partition, name: &str) -> Vec<u64> {
        floats(part, name).iter().map(|x| x.to_bits()).collect()
    }

    #[test]
    fn test_written_output_matches_inline_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let parts = vec![noisy(0), noisy(40)];
        let data = dataset(&dir.path().join("in"), &parts);
        let def = WorkflowDefinition::new(manifest().with_continuous(["Age", "Fee"]))
            .with_step(Step::new(
                "Age",
                [Operator::FillMedian { sample_size: 1000 }, Operator::Log],
            ))
            .with_step(Step::new("Fee", [Operator::Normalize]))
            .with_step(Step::new(ColumnKind::Categorical, [Operator::categorify()]));

        let mut fitted = engine(&def, 1);
        fitted.fit(&data).unwrap();
        let first = fitted
            .transform(&data, &TransformOptions::new(dir.path().join("first")))
            .unwrap();

        let written = read_partition(&first.files[0].path).unwrap();
        let inline = fitted
            .apply_inline(&Partition::concat(&parts).unwrap())
            .unwrap();
        assert!(floats(&written, "Age").contains(&f64::INFINITY));
        assert_eq!(float_bits(&written, "Age"), float_bits(&inline, "Age"));
        assert_eq!(float_bits(&written, "Fee"), float_bits(&inline, "Fee"));

        let stats_path = dir.path().join("stats.json");
        fitted.save_stats(&stats_path).unwrap();
        let mut reloaded = engine(&def, 1);
        let loaded = reloaded.load_stats(&stats_path).unwrap();
        assert_eq!(*loaded, **fitted.statistics().unwrap());

        let second = reloaded
            .transform(&data, &TransformOptions::new(dir.path().join("second")))
            .unwrap();
        assert_eq!(
            std::fs::read(&first.files[0].path).unwrap(),
            std::fs::read(&second.files[0].path).unwrap()
        );
    }

    #[test]
    fn test_stats_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(&dir.path().join("in"), &train_parts());
        let path = dir.path().join("stats.json");

        let mut engine = engine(&petfinder(), 1);
        assert!(engine.save_stats(&path).is_err());
        let fitted = engine.fit(&data).unwrap();
        engine.save_stats(&path).unwrap();

        engine.clear_stats();
        assert!(!engine.is_fit());
        let loaded = engine.load_stats(&path).unwrap();
        assert_eq!(*loaded, *fitted);

        let probe = &train_parts()[0];
        assert!(engine.apply_inline(probe).is_ok());

        let other = WorkflowDefinition::new(manifest())
            .with_step(Step::new(ColumnKind::Continuous, [Operator::Normalize]));
        let mut other = self::engine(&other, 1);
        assert!(matches!(
            other.load_stats(&path).unwrap_err(),
            RuntimeError::InvalidDefinition(_)
        ));
    }

    #[test]
    fn test_stateless_workflow_needs_no_fit() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(&dir.path().join("in"), &train_parts());
        let def = WorkflowDefinition::new(manifest()).with_step(remap_label());
        let engine = engine(&def, 1);
        assert!(engine.is_fit());

        let summary = engine
            .transform(&data, &TransformOptions::new(dir.path().join("out")))
            .unwrap();
        assert_eq!(summary.num_rows, 6);

        let inline = engine.inline_transform().unwrap();
        let out = inline.apply(&train_parts()[1]).unwrap();
        assert_eq!(ints(&out, "AdoptionSpeed"), [1, 1, 0]);
    }
}
