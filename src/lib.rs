pub mod cli;
pub mod core;
pub mod providers;
pub mod refresh;
pub mod service;
pub mod store;

pub use crate::service::RatesService;

use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, info};

pub enum AppCommand {
    /// Refresh once and print the rates table.
    Show,
    /// Refresh once and write the snapshot JSON to a file, or stdout.
    Export { output: Option<PathBuf> },
    /// Keep refreshing in the background and reprint the table every interval.
    Watch,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("Rates tracker starting...");

    let config = crate::core::config::AppConfig::load(config_path)?;
    debug!("Loaded config: {config:#?}");

    let service = RatesService::from_config(&config)?;

    match command {
        AppCommand::Show => {
            let pb = cli::ui::new_spinner("Fetching rates...");
            service.refresh_now().await;
            pb.finish_and_clear();
            println!("{}", service.snapshot().display_as_table());
        }
        AppCommand::Export { output } => {
            service.refresh_now().await;
            cli::rates::write_json(&service.snapshot(), output.as_deref())?;
        }
        AppCommand::Watch => {
            let refresh_task = service.start_background_refresh();
            let mut ticker = tokio::time::interval(config.refresh_interval());
            // First tick fires at once, before any cycle had a chance to finish.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        println!("{}\n", service.snapshot().display_as_table());
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted, stopping background refresh");
                        break;
                    }
                }
            }
            refresh_task.abort();
        }
    }

    Ok(())
}
