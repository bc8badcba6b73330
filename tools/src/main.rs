//! retail-runner: batch runner for the retail analytics pipeline.
//!
//! Usage:
//!   retail-runner --input superstore.csv --db run.db --out ./extract
//!   retail-runner --input superstore.csv --seed 7 --json

use anyhow::{Context, Result};
use retail_core::{
    config::PipelineConfig,
    consistency_stage::CheckPhase,
    engine::PipelineEngine,
    extract::write_extract,
    gate_stage::{GateOutcome, MarketClass},
    store::PipelineStore,
    types::new_run_id,
};
use std::env;
use std::path::Path;

#[derive(serde::Serialize)]
struct RunSummary {
    run_id: String,
    seed: u64,
    rows: usize,
    sample_rows: usize,
    raw_violations: usize,
    corrected_violations: usize,
    rows_corrected: usize,
    excluded_fields: Vec<String>,
    gates_passed: usize,
    gates_failed: usize,
    core_markets: Vec<String>,
    non_core_markets: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let json = args.iter().any(|a| a == "--json");
    let input = string_arg(&args, "--input")
        .context("missing required --input <transactions.csv>")?;
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");
    let out = string_arg(&args, "--out");
    let run_id = string_arg(&args, "--run-id")
        .map(str::to_string)
        .unwrap_or_else(new_run_id);

    if !json {
        println!("retail-runner");
        println!("  input:     {input}");
        println!("  seed:      {seed}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!("  run_id:    {run_id}");
        println!();
    }

    let config = PipelineConfig::load(data_dir)?;
    let store = PipelineStore::open(db)?;
    store.migrate()?;
    store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"), input)?;

    let mut engine = PipelineEngine::build(run_id.clone(), seed, store, config);
    let rows = engine
        .load_file(input)
        .with_context(|| format!("loading {input}"))?;
    engine.run()?;

    if let Some(dir) = out {
        let extract = engine.build_extract()?;
        write_extract(&extract, Path::new(dir))?;
    }

    let summary = summarize(&engine, seed, rows);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, out);
    }
    Ok(())
}

fn summarize(engine: &PipelineEngine, seed: u64, rows: usize) -> RunSummary {
    let violations = |phase| {
        engine
            .consistency_report(phase)
            .map_or(0, |r| r.violation_count())
    };
    let markets_of = |class: MarketClass| -> Vec<String> {
        engine
            .market_classes()
            .iter()
            .filter(|(_, c)| *c == class)
            .map(|(m, _)| m.clone())
            .collect()
    };
    let gates = engine.gate_results();

    RunSummary {
        run_id: engine.run_id.clone(),
        seed,
        rows,
        sample_rows: engine.sample_row_ids().map_or(0, <[_]>::len),
        raw_violations: violations(CheckPhase::Raw),
        corrected_violations: violations(CheckPhase::Corrected),
        rows_corrected: engine.correction_outcome().map_or(0, |o| o.rows_changed()),
        excluded_fields: engine
            .field_registry()
            .map(|r| r.excluded().iter().map(|f| f.column().to_string()).collect())
            .unwrap_or_default(),
        gates_passed: gates.iter().filter(|g| g.outcome == GateOutcome::Pass).count(),
        gates_failed: gates.iter().filter(|g| g.outcome == GateOutcome::Fail).count(),
        core_markets: markets_of(MarketClass::Core),
        non_core_markets: markets_of(MarketClass::NonCore),
    }
}

fn print_summary(s: &RunSummary, out: Option<&str>) {
    println!("=== Run Summary ===");
    println!("  rows loaded:          {}", s.rows);
    println!("  sample rows:          {}", s.sample_rows);
    println!("  violations (raw):     {}", s.raw_violations);
    println!("  violations (fixed):   {}", s.corrected_violations);
    println!("  rows corrected:       {}", s.rows_corrected);
    println!("  excluded fields:      {}", s.excluded_fields.join(", "));
    println!("  gates passed/failed:  {}/{}", s.gates_passed, s.gates_failed);
    println!("  core markets:         {}", s.core_markets.join(", "));
    println!("  non-core markets:     {}", s.non_core_markets.join(", "));
    if let Some(dir) = out {
        println!("  extract:              {dir}");
    }
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
