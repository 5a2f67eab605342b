//! critpath: work/span critical-path profiler for recorded traces
//!
//! Replays a SQLite trace store and reports work, span, parallelism and
//! per-call-site profiles.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use log::{debug, info};

use critpath::report::{write_profile, write_tables, OutputFormat};
use critpath::{profile_store, ReplayConfig, TraceStore};

#[derive(Parser)]
#[command(name = "critpath")]
#[command(about = "Work/span critical-path profiler for recorded traces")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a trace and print its work/span profile
    Profile {
        /// Path to the trace database
        trace: PathBuf,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,

        /// Only show the N call sites with the most work
        #[arg(long)]
        top: Option<usize>,

        /// Abort on the first dangling reference instead of skipping it
        #[arg(long)]
        strict: bool,

        /// Check that the trace closes every call and thread itself: skip the
        /// end-of-trace unwind and fail with an unbalanced-stack error if
        /// anything is still open
        #[arg(long)]
        no_unwind: bool,

        /// Dangling references reported at warn level before the rest go to debug
        #[arg(long, default_value_t = 20)]
        max_warnings: usize,
    },
    /// Print the row count of every table in a trace
    Tables {
        /// Path to the trace database
        trace: PathBuf,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn run_profile(
    trace: PathBuf,
    format: OutputFormat,
    top: Option<usize>,
    config: ReplayConfig,
) -> Result<()> {
    let store = TraceStore::open(&trace)?;
    debug!("Loaded {} with {:?}", trace.display(), config);

    let (summary, report) = profile_store(&store, config)
        .with_context(|| format!("Failed to profile {}", trace.display()))?;
    info!(
        "Replayed {} instructions, {} skipped",
        summary.instructions, summary.skipped_instructions
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_profile(&mut out, &report, &summary, format, top)?;
    out.flush()?;
    Ok(())
}

fn run_tables(trace: PathBuf, format: OutputFormat) -> Result<()> {
    let store = TraceStore::open(&trace)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_tables(&mut out, &store.table_counts(), format)?;
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Profile {
            trace,
            format,
            top,
            strict,
            no_unwind,
            max_warnings,
        } => {
            let config = ReplayConfig {
                strict,
                max_reported_warnings: max_warnings,
                unwind_at_end: !no_unwind,
            };
            run_profile(trace, format, top, config)
        }
        Commands::Tables { trace, format } => run_tables(trace, format),
    }
}
