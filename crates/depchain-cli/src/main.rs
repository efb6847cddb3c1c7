//! depchain CLI entrypoint.

use clap::Parser;

mod client;
mod commands;
mod config;
mod daemon;
mod handlers;

use commands::{Commands, ConfigCommands};
use config::{CliConfig, LogFormat};

#[derive(Parser)]
#[command(name = "depchain")]
#[command(author, version, about = "Dependency-chain build scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Serve {
        config,
        memory,
        listen,
    } = cli.command
    {
        let config = handlers::daemon_config(&config, memory, listen)?;
        daemon::init_logging(config.log_format);
        return daemon::serve(config).await;
    }

    daemon::init_logging(LogFormat::Pretty);
    let config = CliConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Serve { .. } => {}
        Commands::Validate { path } => handlers::validate(&path)?,
        Commands::Schema { kind } => handlers::schema(kind)?,
        Commands::Schedulers => handlers::list_schedulers(&config).await?,
        Commands::Request {
            scheduler,
            ssid,
            reason,
            external_id,
            properties,
        } => {
            handlers::request(&config, &scheduler, &ssid, reason, external_id, &properties).await?
        }
        Commands::Pending { scheduler, ssid } => {
            handlers::pending(&config, &scheduler, ssid.as_deref()).await?
        }
        Commands::Cancel { scheduler, ssid } => handlers::cancel(&config, &scheduler, &ssid).await?,
        Commands::Complete {
            buildset_id,
            result,
        } => handlers::complete(&config, &buildset_id, result).await?,
        Commands::Commit {
            revision,
            branch,
            repository,
        } => handlers::commit(&config, revision, branch, repository).await?,
        Commands::Expire { older_than } => handlers::expire(&config, older_than).await?,
        Commands::Reconcile => handlers::reconcile(&config).await?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(())
}
