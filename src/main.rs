//! Expression Call Worker main executable

pub mod calls;
pub mod common;
pub mod conf;
pub mod ontology;

use clap::{Args, Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Expression call heavy lifting",
    long_about = "This tool performs the heavy lifting for querying precomputed gene expression calls"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Expression call related commands.
    Calls(Calls),
}

/// Parsing of "calls *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Calls {
    /// The sub command to run
    #[command(subcommand)]
    command: CallsCommands,
}

/// Enum supporting the parsing of "calls *" sub commands.
#[derive(Debug, Subcommand)]
enum CallsCommands {
    Query(calls::query::Args),
    Count(calls::count::Args),
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::Calls(calls) => match &calls.command {
                CallsCommands::Query(args) => {
                    calls::query::run(&cli.common, args)?;
                }
                CallsCommands::Count(args) => {
                    calls::count::run(&cli.common, args)?;
                }
            },
        }

        Ok::<(), anyhow::Error>(())
    })?;
    term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")))?;

    Ok(())
}
