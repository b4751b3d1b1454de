mod cli;
mod config;
mod container;
mod coordinator;
mod error;
mod executor;
mod jobs;
mod logging;
mod router;
mod shutdown;
mod state_machine;
mod transport;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command};
use config::AgentConfig;
use container::{DockerRuntime, FirmwareLayout};
use coordinator::JobCoordinator;
use error::AgentError;
use executor::FirmwareUpdater;
use jobs::JobsClient;
use router::{DEPLOY_FIRMWARE, OperationRouter};
use transport::{MqttSession, Transport};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Agent failed");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode, AgentError> {
    let config = match cli.device_name {
        Some(name) => AgentConfig::load_with(&cli.config, Some(name))?,
        None => AgentConfig::load(&cli.config)?,
    };

    match cli.command {
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run => run(config).await,
    }
}

async fn run(config: AgentConfig) -> Result<ExitCode, AgentError> {
    let thing_name = config.agent_thing_name();
    tracing::info!(device = %config.device_name, thing = %thing_name, "Starting fleet agent");

    let runtime = DockerRuntime::new()?;
    let stop = shutdown::install_shutdown_handler()?;
    let credentials = config.credentials();
    let (session, inbox) = tokio::select! {
        result = MqttSession::connect(&thing_name, &config.broker, credentials.as_ref()) => result?,
        _ = stop.cancelled() => {
            tracing::info!("Stopped before the first connection");
            return Ok(ExitCode::SUCCESS);
        }
    };
    let transport: Arc<dyn Transport> = Arc::new(session);

    let updater = FirmwareUpdater::new(Arc::new(runtime), FirmwareLayout::from_config(&config));
    let router = OperationRouter::new().route(DEPLOY_FIRMWARE, Arc::new(updater));

    let coordinator = JobCoordinator::new(JobsClient::new(thing_name, transport), Arc::new(router));
    let reason = coordinator.run(inbox, stop).await;

    if reason.is_failure() {
        tracing::error!(reason = %reason, "Agent stopped");
        Ok(ExitCode::FAILURE)
    } else {
        tracing::info!("Agent stopped");
        Ok(ExitCode::SUCCESS)
    }
}
