//! Quicktick CLI
//!
//! Runs the built-in scenarios on the event loop.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use quicktick::scenarios::{self, Console};
use quicktick::{ClockKind, EventLoop, LoopConfig, VERSION};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quicktick")]
#[command(author, version, about = "Timer and microtask scheduling core of a minimal JavaScript host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in scenario to completion
    Run {
        /// Scenario name (see `quicktick list`)
        scenario: String,

        /// Use the virtual clock: waits complete instantly
        #[arg(long)]
        virtual_clock: bool,

        /// Loop configuration file (JSON)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Print loop statistics as JSON after the run
        #[arg(long)]
        stats: bool,
    },

    /// List the built-in scenarios
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    setup_logging(cli.verbose);

    let outcome = match cli.command {
        Commands::Run {
            scenario,
            virtual_clock,
            config,
            stats,
        } => run_scenario(&scenario, virtual_clock, config, stats),
        Commands::List => {
            list_scenarios();
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins over `-v` when set
fn setup_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn list_scenarios() {
    println!("Quicktick {} scenarios:\n", VERSION);
    for scenario in scenarios::SCENARIOS {
        println!("  {:<16} {}", scenario.name, scenario.summary);
    }
}

/// Returns `Ok(false)` when the script raised errors nobody handled
fn run_scenario(
    name: &str,
    virtual_clock: bool,
    config_path: Option<PathBuf>,
    show_stats: bool,
) -> anyhow::Result<bool> {
    let scenario = scenarios::find(name)
        .ok_or_else(|| anyhow!("unknown scenario '{}' (try `quicktick list`)", name))?;

    let mut config = match config_path {
        Some(path) => LoopConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => LoopConfig::default(),
    };
    if virtual_clock {
        config = config.with_clock(ClockKind::Virtual);
    }

    println!("========== Code ==========");
    println!("{}", scenario.source.trim_end());
    println!("======== Execution =======");

    let mut event_loop = EventLoop::with_config(&config);
    let console = Console::echoing();
    let result = scenario
        .run(&mut event_loop, &console)
        .with_context(|| format!("scenario '{}' aborted", scenario.name))?;

    tracing::info!(
        timers = result.timers_fired,
        microtasks = result.microtasks_processed,
        at = %result.final_time,
        "event loop finished"
    );

    if show_stats {
        let stats = serde_json::to_string_pretty(&event_loop.stats())?;
        println!("{}", stats);
    }

    if result.errors > 0 {
        eprintln!("{} unhandled error(s)", result.errors);
        return Ok(false);
    }
    Ok(true)
}
