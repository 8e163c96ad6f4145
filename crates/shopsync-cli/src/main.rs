mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands, ConfigCommands};
use crate::commands::common::{resolve_config_path, resolve_db_path};
use crate::commands::config::run_config_show;
use crate::commands::issues::run_issues;
use crate::commands::pending::run_pending;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "shopsync=info"
        .parse::<tracing_subscriber::filter::Directive>()
        .map_err(|error| CliError::Logging(format!("{error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config_path = resolve_config_path(cli.config);
    let tenant = cli.tenant;

    match cli.command {
        Commands::Status { json } => run_status(tenant, json, &db_path)?,
        Commands::Pending { entity_type, json } => {
            run_pending(tenant, entity_type.as_deref(), json, &db_path)?;
        }
        Commands::Issues { json } => run_issues(tenant, json, &db_path)?,
        Commands::Sync { json } => run_sync(tenant, json, &db_path, &config_path).await?,
        Commands::Watch { interval } => {
            run_watch(tenant, interval, &db_path, &config_path).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => run_config_show(&config_path)?,
        },
    }

    Ok(())
}
