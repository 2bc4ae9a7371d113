//! Run command handler
//!
//! Acts as the iteration driver: reads the input features, binds parameter
//! values, builds one execution session and feeds it every feature.

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use luaproc_cli::script::{
    Bindings, BindingStyle, BoundValue, Crs, EnvironmentBuilder, FeedbackMessage, Field, Fields,
    LuaEngine, Record, RecordTransformer, RunReport, ScriptDefinition, default_bindings,
    feature_collection, find_script, read_features,
};

use crate::cli::{RunArgs, resolve_folders};

pub fn handle_run_command(args: RunArgs, folder_overrides: &[PathBuf]) -> Result<()> {
    let folders = resolve_folders(folder_overrides)?;
    let script = find_script(&args.script, &folders)?;

    if let Some(error) = script.error() {
        anyhow::bail!("'{}' cannot be run.\n{}", script.display_name(), error);
    }

    let source_crs = parse_crs(&args.source_crs)?;
    let target_crs = parse_crs(&args.target_crs)?;
    let bindings = collect_bindings(&script, &args.params)?;

    let input = fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read input file: {}", args.input.display()))?;
    let records = read_features(&input)
        .with_context(|| format!("Failed to parse GeoJSON: {}", args.input.display()))?;
    let fields = output_fields(&records, &args.fields)?;
    log::debug!(
        "Read {} features with {} fields from {}",
        records.len(),
        fields.len(),
        args.input.display()
    );

    let context = EnvironmentBuilder::new()
        .with_target_crs(target_crs)
        .build_lua(&script, &bindings)
        .with_context(|| format!("Failed to prepare '{}'", script.display_name()))?;
    let transformer = context.transformer(source_crs, fields);

    let start = Instant::now();
    let result = if args.fail_fast {
        run_fail_fast(&transformer, records)
    } else {
        Ok(transformer.run(records))
    };
    print_feedback(context.engine());
    let report = result?;
    let elapsed = start.elapsed();

    let document = feature_collection(&report.outputs);
    let text = serde_json::to_string_pretty(&document).context("Failed to format GeoJSON")?;
    match &args.output {
        Some(path) => {
            fs::write(path, text)
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
            eprintln!(
                "Results saved to: {}",
                path.display().to_string().bright_green()
            );
        }
        None => println!("{}", text),
    }

    eprintln!(
        "Processed {} features in {:.2}ms: {} written, {} filtered, {} failed",
        report.processed,
        elapsed.as_secs_f64() * 1000.0,
        report.outputs.len().to_string().bright_green(),
        report.filtered,
        if report.failures.is_empty() {
            "0".normal()
        } else {
            report.failures.len().to_string().bright_red()
        }
    );

    if !report.is_clean() {
        for (index, error) in &report.failures {
            eprintln!("  feature {}: {}", index, error);
        }
        anyhow::bail!("{} features failed", report.failures.len());
    }

    Ok(())
}

fn parse_crs(authid: &str) -> Result<Crs> {
    Crs::parse(authid).with_context(|| format!("Invalid reference system '{}'", authid))
}

/// Schema inferred from the input, extended by `--field name:type` specs
fn output_fields(records: &[Record], specs: &[String]) -> Result<Fields> {
    let mut fields = Fields::infer(records);
    for spec in specs {
        let field = Field::parse(spec).with_context(|| {
            format!(
                "Field '{}' must be written as name:type (string, integer, double, boolean)",
                spec
            )
        })?;
        fields.insert(field);
    }
    Ok(fields)
}

/// Declared defaults overlaid with `name=value` pairs from the command line
fn collect_bindings(script: &ScriptDefinition, params: &[String]) -> Result<Bindings> {
    let mut bindings = default_bindings(script);

    for param in params {
        let (name, value) = param
            .split_once('=')
            .with_context(|| format!("Parameter '{}' must be written as name=value", param))?;
        let name = name.trim();

        let declaration = script.parameter(name).with_context(|| {
            format!(
                "'{}' has no parameter named '{}'",
                script.display_name(),
                name
            )
        })?;
        if declaration.kind.binding_style() == BindingStyle::PassThrough {
            log::warn!(
                "Parameter '{}' ({}) is not passed to the script",
                name,
                declaration.kind.keyword()
            );
        }

        bindings.insert(name.to_string(), BoundValue::Text(value.to_string()));
    }

    for param in script.parameters() {
        let bound = matches!(bindings.get(&param.name), Some(v) if *v != BoundValue::Null);
        if !param.optional
            && !bound
            && param.kind.binding_style() != BindingStyle::PassThrough
        {
            log::warn!("Parameter '{}' has no value and is bound to nil", param.name);
        }
    }

    Ok(bindings)
}

fn run_fail_fast(
    transformer: &RecordTransformer<'_, LuaEngine>,
    records: Vec<Record>,
) -> Result<RunReport> {
    let mut report = RunReport::default();
    for (index, record) in records.iter().enumerate() {
        let outputs = transformer
            .execute(record)
            .with_context(|| format!("Feature {} failed", index))?;
        report.processed += 1;
        if outputs.is_empty() {
            report.filtered += 1;
        }
        report.outputs.extend(outputs);
    }
    Ok(report)
}

fn print_feedback(engine: &LuaEngine) {
    for message in engine.take_feedback() {
        match message {
            FeedbackMessage::Info(msg) => eprintln!("{} {}", "info:".cyan(), msg),
            FeedbackMessage::Warning(msg) => eprintln!("{} {}", "warning:".yellow(), msg),
            FeedbackMessage::Error(msg) => eprintln!("{} {}", "error:".bright_red(), msg),
        }
    }
}
