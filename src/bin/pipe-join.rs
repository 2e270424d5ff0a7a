//! CLI tool to cross-join delimited text files.
//!
//! Usage:
//!   pipe-join <main.txt> <other.txt>... [-o output.txt]
//!
//! Every file starts with a header line of `name[:type]` fields. The main
//! file drives the outer loop of the join. Output uses the same format and
//! is written while the join produces it.

use clap::Parser;
use log::LevelFilter;
use rowpipes_rs::steps::{
    CartesianJoin, CartesianJoinConfig, DelimitedTextInput, DelimitedTextOutput,
};
use rowpipes_rs::{EngineConfig, Pipeline};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process;

/// Cross-join delimited text files.
///
/// Produces one output row for every combination of one row from each
/// input file, main file outermost.
#[derive(Parser)]
#[command(name = "pipe-join")]
struct Cli {
    /// Main (driving) input file
    main: PathBuf,

    /// Files joined against the main file, innermost last
    #[arg(required = true)]
    others: Vec<PathBuf>,

    /// Rows per file kept in memory before replaying from disk
    #[arg(long, default_value_t = rowpipes_rs::steps::DEFAULT_CACHE_SIZE)]
    cache_size: usize,

    /// Field delimiter of input and output
    #[arg(short, long, default_value_t = ';')]
    delimiter: char,

    /// Directory for spill files (default: system temp dir)
    #[arg(long)]
    spill_dir: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Show paths and record counts on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let mut config = EngineConfig::default();
    if let Some(dir) = &cli.spill_dir {
        config = config.with_spill_dir(dir);
    }

    if cli.verbose {
        eprintln!("Main:     {}", cli.main.display());
        for other in &cli.others {
            eprintln!("Join:     {}", other.display());
        }
        eprintln!("Output:   {}", cli.output.as_deref().unwrap_or("(stdout)"));
        eprintln!("Spill:    {}", config.spill_dir.display());
    }

    let inputs: Vec<(String, &PathBuf)> = std::iter::once(&cli.main)
        .chain(&cli.others)
        .enumerate()
        .map(|(i, path)| (format!("input{i}"), path))
        .collect();

    let output = match &cli.output {
        Some(out_path) => match DelimitedTextOutput::create(Path::new(out_path), cli.delimiter) {
            Ok(output) => output,
            Err(e) => {
                eprintln!("Error creating output file '{out_path}': {e}");
                process::exit(1);
            }
        },
        None => DelimitedTextOutput::new(BufWriter::new(io::stdout()), cli.delimiter),
    };
    let join = CartesianJoin::new(
        CartesianJoinConfig::new("input0").with_cache_size(cli.cache_size),
    );

    let mut pipeline = Pipeline::new().with_config(config);
    for (name, path) in &inputs {
        pipeline.add_step(name.as_str(), DelimitedTextInput::new(path.as_path(), cli.delimiter));
    }
    pipeline.add_step("join", join).add_step("output", output);
    for (name, _) in &inputs {
        pipeline.add_hop(name.as_str(), "join");
    }
    pipeline.add_hop("join", "output");

    let result = match pipeline.run() {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Pipeline error: {e}");
            process::exit(1);
        }
    };
    if !result.is_success() {
        for step in result.steps.iter().filter(|s| s.error.is_some()) {
            eprintln!(
                "Step '{}' failed: {}",
                step.name,
                step.error.as_deref().unwrap_or_default()
            );
        }
        process::exit(1);
    }

    if cli.verbose {
        let read: u64 = inputs
            .iter()
            .filter_map(|(name, _)| result.step(name))
            .map(|s| s.metrics.lines_written)
            .sum();
        let written = result.step("output").map_or(0, |s| s.metrics.lines_read);
        eprintln!("Records:  {read} in -> {written} out");
    }
}
