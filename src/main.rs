// Clippy allows
#![allow(clippy::too_many_arguments)]

//! SFRGRID: stream flowlines to structured-grid SFR reaches
//!
//! Usage: sfrgrid <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process;

use sfrgrid::config::SfrConfig;
use sfrgrid::error::Result;
use sfrgrid::flowlines::read_flowlines;
use sfrgrid::grid::StructuredGrid;
use sfrgrid::output::ReachWriter;
use sfrgrid::pipeline::{check_network, Pipeline};
use sfrgrid::RunStatus;

#[derive(Parser)]
#[command(name = "sfrgrid")]
#[command(version)]
#[command(about = "SFRGRID: discretize stream flowline networks onto structured model grids", long_about = None)]
struct Cli {
    /// Number of threads to use (default: number of CPUs)
    #[arg(long, short = 't', global = true)]
    threads: Option<usize>,

    /// Log debug output to stderr (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Intersect flowlines with a grid and write routed reaches
    Build {
        /// Flowline table (tab-separated, WKT geometry)
        #[arg(short, long)]
        flowlines: PathBuf,

        /// Grid description (JSON)
        #[arg(short, long)]
        grid: PathBuf,

        /// Run configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Reach table output (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Segment table output
        #[arg(long)]
        segments: Option<PathBuf>,

        /// Lowered model bottoms output (with layers.lower_model_bottom)
        #[arg(long)]
        bottoms: Option<PathBuf>,

        /// Print the diagnostic report to stderr
        #[arg(long)]
        report: bool,

        /// Print run statistics to stderr
        #[arg(long)]
        stats: bool,

        /// Exit with status 2 if any component was excluded
        #[arg(long)]
        strict: bool,
    },

    /// Validate flowline routing without a grid
    Check {
        /// Flowline table (tab-separated, WKT geometry)
        #[arg(short, long)]
        flowlines: PathBuf,

        /// Run configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    // Configure thread pool if --threads specified
    if let Some(n) = cli.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
        {
            eprintln!("Error: failed to initialize thread pool: {}", e);
            process::exit(1);
        }
    }

    let result = match cli.command {
        Commands::Build {
            flowlines,
            grid,
            config,
            output,
            segments,
            bottoms,
            report,
            stats,
            strict,
        } => run_build(
            flowlines, grid, config, output, segments, bottoms, report, stats, strict,
        ),

        Commands::Check { flowlines, config } => run_check(flowlines, config),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<SfrConfig> {
    match path {
        Some(p) => SfrConfig::from_path(p),
        None => Ok(SfrConfig::default()),
    }
}

fn run_build(
    flowlines: PathBuf,
    grid: PathBuf,
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    segments: Option<PathBuf>,
    bottoms: Option<PathBuf>,
    report: bool,
    stats: bool,
    strict: bool,
) -> Result<i32> {
    let config = load_config(config)?;
    let grid = StructuredGrid::from_path(grid)?;
    let records = read_flowlines(flowlines)?;

    let result = Pipeline::new(&grid, &config).run(records)?;

    match output {
        Some(path) => {
            let mut writer = ReachWriter::new(File::create(path)?);
            writer.write_reaches(&result.network)?;
            writer.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut writer = ReachWriter::new(stdout.lock());
            writer.write_reaches(&result.network)?;
            writer.flush()?;
        }
    }
    if let Some(path) = segments {
        let mut writer = ReachWriter::new(File::create(path)?);
        writer.write_segments(&result.network)?;
        writer.flush()?;
    }
    if let Some(path) = bottoms {
        let mut writer = ReachWriter::new(File::create(path)?);
        writer.write_lowered_bottoms(&result.lowered_bottoms)?;
        writer.flush()?;
    }

    if report {
        eprint!("{}", result.report);
    }
    if stats {
        eprintln!("Build stats: {}", result.stats);
    }

    let status = result.status();
    if status != RunStatus::Completed {
        log::warn!("{} ({} diagnostics)", status, result.report.len());
    }
    Ok(if strict && status == RunStatus::CompletedWithErrors {
        2
    } else {
        0
    })
}

fn run_check(flowlines: PathBuf, config: Option<PathBuf>) -> Result<i32> {
    let config = load_config(config)?;
    let records = read_flowlines(flowlines)?;
    let result = check_network(records, &config)?;

    println!(
        "{} segments, {} outlets, {} cycles, {} orphan references",
        result.segments,
        result.outlets,
        result.routing.cycles.len(),
        result.routing.orphans.len()
    );
    print!("{}", result.report);
    Ok(if result.report.status() == RunStatus::CompletedWithErrors {
        2
    } else {
        0
    })
}
