//! Sim Hook CLI Application
//!
//! Command-line front end for the sim-hook-bridge library:
//! - Loads callback scripts into the embedded interpreter
//! - Binds callbacks to simulation phases with `--fix` or `[[fixes]]`
//! - Runs the reference simulation and prints a run summary (text or JSON)
//!
//! A callback failure halts the run and the process exits non-zero.

use anyhow::{Context, Result};
use clap::Parser;
use sim_hook_bridge::{Directive, Simulation};
use std::path::PathBuf;

mod config;
mod report;

use config::{AppConfig, FixConfig, OutputFormat};
use report::Report;

/// Sim Hook - Run a simulation with scripted per-step callbacks
#[derive(Parser, Debug)]
#[command(name = "sim-hook-cli")]
#[command(about = "Run a simulation with scripted post_force / end_of_step callbacks", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Script file to load before fixes are added (can be repeated)
    #[arg(short, long, value_name = "FILE")]
    script: Vec<PathBuf>,

    /// Fix to add, as ID=HOOK CALLBACK (can be repeated)
    #[arg(short, long, value_name = "ID=HOOK CALLBACK", value_parser = parse_fix)]
    fix: Vec<FixConfig>,

    /// Number of timesteps to run (overrides the config file)
    #[arg(short = 'n', long, value_name = "COUNT")]
    steps: Option<u64>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Output file for the run summary (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn parse_fix(arg: &str) -> std::result::Result<FixConfig, String> {
    FixConfig::parse_arg(arg).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Sim Hook CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using bridge library v{}", sim_hook_bridge::VERSION);

    let config = build_config(&args)?;
    config.validate()?;

    if config.fixes.is_empty() {
        log::warn!("No fixes configured; the run will not call any script");
    }

    run(&config)
}

/// Merge the optional config file with command line overrides
fn build_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            let config = config::load_config(path)?;
            log::debug!("Configuration loaded successfully");
            config
        }
        None => AppConfig::default(),
    };

    config.scripts.extend(args.script.iter().cloned());

    // Command line fixes replace config fixes with the same id
    for fix in &args.fix {
        match config.fixes.iter_mut().find(|existing| existing.id == fix.id) {
            Some(existing) => *existing = fix.clone(),
            None => config.fixes.push(fix.clone()),
        }
    }

    if let Some(steps) = args.steps {
        config.run.steps = steps;
    }
    if args.json {
        config.run.format = OutputFormat::Json;
    }
    if args.output.is_some() {
        config.run.output = args.output.clone();
    }

    Ok(config)
}

fn run(config: &AppConfig) -> Result<()> {
    let mut sim = Simulation::with_global_interpreter(&config.interpreter, config.simulation.clone())
        .context("Failed to start simulation")?;

    for script in &config.scripts {
        sim.interpreter()
            .exec_file(script)
            .with_context(|| format!("Failed to load script {:?}", script))?;
    }

    for fix in &config.fixes {
        let directive = Directive::new(fix.hook.as_str(), fix.callback.as_str());
        sim.add_fix(&fix.id, &directive)
            .with_context(|| format!("Failed to add fix '{}' ({})", fix.id, directive))?;
    }

    let summary = sim
        .run(config.run.steps)
        .with_context(|| format!("Simulation halted at step {}", sim.snapshot().step))?;

    let report = Report {
        summary: &summary,
        fixes: sim.fixes(),
        interpreter: sim.interpreter().stats(),
    };
    let rendered = report.render(config.run.format)?;
    report::emit(&rendered, config.run.output.as_deref())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
