use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cache_lab_check::config::HarnessConfig;
use cache_lab_check::driver::{FailurePolicy, Verifier, check_snapshots};
use cache_lab_check::oracle::{CacheGeometry, TEST_ASSOCIATIVITY, expected_phases};
use cache_lab_check::stats_parser::parse_report_file;

const BANNER: &str = r"
                                 _
                                | |
  ___ ___  _ __   __ _ _ __ __ _| |_ ___
 / __/ _ \| '_ \ / _` | '__/ _` | __/ __|
| (_| (_) | | | | (_| | | | (_| | |_\__ \
 \___\___/|_| |_|\__, |_|  \__,_|\__|___/
                  __/ |
                 |___/
";

const NEXT_STEP_HINT: &str = "Your run has passed the test. If your run passed direct mapped, \
                              move on to 4.2. If it passed associativity, move on to 4.3.";

#[derive(Parser, Debug)]
#[command(
    name = "cache-lab-check",
    version,
    about = "Verify a simulated L1 cache against its expected hit/miss counts"
)]
struct Cli {
    /// Log debug output (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the workload for every geometry in the sweep and check the counters
    Sweep(SweepArgs),
    /// Check an existing statistics report for one geometry
    Check(CheckArgs),
    /// Print the expected counters for one geometry
    Expect(GeometryArgs),
}

#[derive(Args, Debug)]
struct SweepArgs {
    /// JSON harness configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Simulator binary
    #[arg(long)]
    simulator: Option<PathBuf>,
    /// Workload executable
    #[arg(long)]
    workload: Option<PathBuf>,
    /// Simulator output directory
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Associativities to sweep (repeatable)
    #[arg(short, long = "associativity")]
    associativities: Vec<u64>,
    /// Cache sizes in bytes to sweep (repeatable)
    #[arg(short = 's', long = "cache-size")]
    cache_sizes: Vec<u64>,
    /// Keep going after a failing geometry and report every failure
    #[arg(long)]
    keep_going: bool,
}

#[derive(Args, Debug)]
struct GeometryArgs {
    /// Cache size in bytes
    #[arg(short = 's', long)]
    cache_size: u64,
    /// Cache associativity
    #[arg(short, long, default_value_t = 1)]
    associativity: u64,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Statistics report (stats.txt)
    report: PathBuf,
    /// JSON harness configuration (for counter names)
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    geometry: GeometryArgs,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_config(path: Option<&PathBuf>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("loading harness config {}", path.display())),
        None => Ok(HarnessConfig::default()),
    }
}

fn load_config(args: &SweepArgs) -> Result<HarnessConfig> {
    let mut config = read_config(args.config.as_ref())?;
    if let Some(simulator) = &args.simulator {
        config.simulator = simulator.clone();
    }
    if let Some(workload) = &args.workload {
        config.workload = workload.clone();
    }
    if let Some(out_dir) = &args.out_dir {
        config.out_dir = out_dir.clone();
    }
    if !args.associativities.is_empty() {
        config.sweep.associativities = args.associativities.clone();
    }
    if !args.cache_sizes.is_empty() {
        config.sweep.cache_sizes = args.cache_sizes.clone();
    }
    if args.keep_going {
        config.policy = FailurePolicy::FullSweep;
    }
    Ok(config)
}

fn cmd_sweep(args: &SweepArgs) -> Result<bool> {
    let config = load_config(args)?;
    info!(
        entries = config.sweep.len(),
        workload = %config.workload.display(),
        "starting sweep"
    );

    let verifier = Verifier::new(config.workload())
        .with_counters(config.counters.clone())
        .with_policy(config.policy);
    let report = verifier.run(&config.sweep);

    for failure in report.failures() {
        eprintln!("FAILED {failure}");
    }
    if report.passed() {
        println!("{BANNER}");
        println!("{NEXT_STEP_HINT}");
    }
    Ok(report.passed())
}

fn cmd_check(args: &CheckArgs) -> Result<bool> {
    let config = read_config(args.config.as_ref())?;
    let geometry = CacheGeometry::new(args.geometry.cache_size, args.geometry.associativity)?;
    let snapshots = parse_report_file(&args.report)
        .with_context(|| format!("parsing {}", args.report.display()))?;
    match check_snapshots(TEST_ASSOCIATIVITY, &geometry, &snapshots, &config.counters) {
        Ok(verdicts) => {
            println!("{geometry}: {} phases ok", verdicts.len());
            Ok(true)
        }
        Err(e) => {
            eprintln!("FAILED {geometry}: {e}");
            Ok(false)
        }
    }
}

fn cmd_expect(args: &GeometryArgs) -> Result<bool> {
    let geometry = CacheGeometry::new(args.cache_size, args.associativity)?;
    println!(
        "{geometry}: {} lines, {} sets",
        geometry.num_lines(),
        geometry.num_sets()
    );
    println!(
        "{:>5}  {:<24} {:>8} {:>8} {:>8} {:>8}",
        "phase", "label", "loads", "stores", "hits", "misses"
    );
    let show = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
    for (i, spec, e) in expected_phases(TEST_ASSOCIATIVITY, &geometry) {
        println!(
            "{:>5}  {:<24} {:>8} {:>8} {:>8} {:>8}",
            i,
            spec.label,
            e.loads,
            e.stores,
            show(e.hits),
            show(e.misses)
        );
    }
    Ok(true)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let passed = match &cli.command {
        Command::Sweep(args) => cmd_sweep(args)?,
        Command::Check(args) => cmd_check(args)?,
        Command::Expect(args) => cmd_expect(args)?,
    };
    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
