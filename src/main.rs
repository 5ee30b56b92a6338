use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tasas::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for tasas::AppCommand {
    fn from(cmd: Commands) -> tasas::AppCommand {
        match cmd {
            Commands::Show => tasas::AppCommand::Show,
            Commands::Export { output } => tasas::AppCommand::Export { output },
            Commands::Watch => tasas::AppCommand::Watch,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Refresh all sources once and display the rates
    Show,
    /// Refresh all sources once and write the snapshot as JSON
    Export {
        /// File to write; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Refresh in the background and redisplay the rates every interval
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => tasas::cli::setup::setup(),
        Some(cmd) => tasas::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
