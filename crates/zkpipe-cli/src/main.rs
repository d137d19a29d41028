//! zkpipe CLI — run the proving pipeline end to end from the terminal.
//!
//! Provides three commands: `run` (compile, calibrate, prove, and verify in
//! one pass, resuming from persisted state), `verify` (check a saved proof
//! against the stored verification key), and `status` (show how far the
//! pipeline got).
//!
//! The bundled backend is [`zkpipe_sim::SimBackend`], which is explicitly
//! NOT cryptographic; the CLI prints a warning on every proving run.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "zkpipe",
    about = "Zero-knowledge proving pipeline — compile, calibrate, prove, verify",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to zkpipe.config.json (default: ./zkpipe.config.json)
    #[arg(long, global = true, default_value = "zkpipe.config.json")]
    config: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: compile, acquire SRS, derive keys, prove
    Run {
        /// Path to the circuit model JSON
        #[arg(long, short)]
        model: PathBuf,

        /// Path to input JSON ({"input_data": [[...]]})
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Output path for the proof file
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Input values given directly (alternative to --input); a built-in
        /// sample vector is used when both are omitted
        #[arg(conflicts_with = "input")]
        values: Vec<f64>,
    },

    /// Verify a previously generated proof file
    Verify {
        /// Path to the proof file written by `zkpipe run`
        #[arg(long)]
        proof: PathBuf,
    },

    /// Show pipeline progress from persisted state
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            model,
            input,
            output,
            values,
        } => {
            commands::run::run(
                &cli.config,
                &model,
                input.as_deref(),
                &values,
                output.as_deref(),
            )
            .await?;
        }
        Commands::Verify { proof } => {
            commands::verify::run(&cli.config, &proof).await?;
        }
        Commands::Status => {
            commands::status::run(&cli.config)?;
        }
    }

    Ok(())
}
