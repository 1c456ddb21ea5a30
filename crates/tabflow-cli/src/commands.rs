//! Subcommand execution.

use std::fs;
use std::time::Instant;

use anyhow::{Context, Result as AnyhowResult};
use serde::Serialize;
use tabflow_core::io::Dataset;
use tabflow_core::{DeviceContext, Field};
use tabflow_runtime::Engine;
use tabflow_runtime::engine::TransformSummary;
use tabflow_runtime::translate::{FeatureColumn, ReducedFeature, Translator};
use tabflow_runtime::workflow::WorkflowDefinition;

use crate::TRACING_TARGET_COMMAND;
use crate::config::{
    Cli, Command, DeviceConfig, FitArgs, FitTransformArgs, InspectArgs, TransformArgs,
    TranslateArgs, WorkflowArgs,
};

/// Runs the parsed command.
pub fn execute(cli: &Cli) -> AnyhowResult<()> {
    match &cli.command {
        Command::Fit(args) => fit(&cli.device, args),
        Command::Transform(args) => transform(&cli.device, args),
        Command::FitTransform(args) => fit_transform(&cli.device, args),
        Command::Inspect(args) => inspect(&cli.device, args),
        Command::Translate(args) => translate(args),
    }
}

/// Reserves memory, then builds the engine and opens the input.
fn prepare(device: &DeviceConfig, args: &WorkflowArgs) -> AnyhowResult<(Engine, Dataset)> {
    let context = device.initialize()?;
    let definition = WorkflowDefinition::load(&args.workflow)
        .with_context(|| format!("failed to load workflow {}", args.workflow.display()))?;
    let engine = Engine::from_definition(&definition, args.engine_config()?, &context)
        .context("failed to compile workflow")?;
    let dataset = open(&args.input, device, &context)?;
    Ok((engine, dataset))
}

fn open(input: &str, device: &DeviceConfig, context: &DeviceContext) -> AnyhowResult<Dataset> {
    Dataset::open(input, context, device.reader_options())
        .with_context(|| format!("failed to open input {input}"))
}

fn fit(device: &DeviceConfig, args: &FitArgs) -> AnyhowResult<()> {
    let started = Instant::now();
    let (mut engine, dataset) = prepare(device, &args.workflow)?;
    let stats = engine.fit(&dataset).context("fit failed")?;
    engine.save_stats(&args.stats).context("failed to save statistics")?;

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        rows = stats.num_rows(),
        statistics = stats.len(),
        path = %args.stats.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fit finished"
    );
    Ok(())
}

fn transform(device: &DeviceConfig, args: &TransformArgs) -> AnyhowResult<()> {
    let (mut engine, dataset) = prepare(device, &args.workflow)?;
    if let Some(path) = &args.stats {
        engine
            .load_stats(path)
            .with_context(|| format!("failed to load statistics {}", path.display()))?;
    }
    let options = args.output.transform_options()?;
    let summary = engine.transform(&dataset, &options).context("transform failed")?;
    report(&summary)
}

fn fit_transform(device: &DeviceConfig, args: &FitTransformArgs) -> AnyhowResult<()> {
    let (mut engine, dataset) = prepare(device, &args.workflow)?;
    let options = args.output.transform_options()?;
    let summary = engine
        .fit_transform(&dataset, &options)
        .context("fit-transform failed")?;
    if let Some(path) = &args.stats {
        engine.save_stats(path).context("failed to save statistics")?;
    }
    report(&summary)
}

fn report(summary: &TransformSummary) -> AnyhowResult<()> {
    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        rows = summary.num_rows,
        files = summary.files.len(),
        partitions = summary.num_partitions,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "transform finished"
    );
    print_json(&summary.metadata)
}

/// Shape of a dataset, as printed by `inspect`.
#[derive(Debug, Serialize)]
struct DatasetReport<'a> {
    files: usize,
    rows: usize,
    part_size: usize,
    schema: &'a [Field],
}

fn inspect(device: &DeviceConfig, args: &InspectArgs) -> AnyhowResult<()> {
    let context = device.initialize()?;
    let dataset = open(&args.input, device, &context)?;
    let rows = dataset.num_rows().context("failed to count rows")?;
    print_json(&DatasetReport {
        files: dataset.num_files(),
        rows,
        part_size: dataset.part_size(),
        schema: dataset.schema().fields(),
    })
}

fn translate(args: &TranslateArgs) -> AnyhowResult<()> {
    let json = fs::read_to_string(&args.features)
        .with_context(|| format!("failed to read {}", args.features.display()))?;
    let features: Vec<FeatureColumn> =
        serde_json::from_str(&json).context("invalid feature column declarations")?;

    let translation = Translator::new(args.label.iter().cloned())
        .translate(&features)
        .context("feature columns cannot be expressed as a workflow")?;
    translation
        .workflow
        .save(&args.output)
        .with_context(|| format!("failed to save workflow {}", args.output.display()))?;

    let reduced: &[ReducedFeature] = &translation.features;
    print_json(&reduced)
}

fn print_json<T: Serialize>(value: &T) -> AnyhowResult<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}
