//! examflow CLI entry point.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use examflow_client::cli::{Cli, Command, ConfigAction};
use examflow_client::commands;
use examflow_client::config::ClientConfig;
use examflow_client::error::{ClientError, ClientResult};
use examflow_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut tracing = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::cli()
    };
    if let Some(format) = cli.log_format {
        tracing = tracing.with_format(format);
    }
    if let Some(ref filter) = cli.log_filter {
        tracing = tracing.with_filter(filter);
    }
    if let Err(e) = init_tracing(tracing) {
        eprintln!("warning: logging disabled: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let mut config = if let Some(ref path) = cli.config {
        ClientConfig::load_from(path).map_err(ClientError::Config)?
    } else {
        ClientConfig::load().map_err(ClientError::Config)?
    };

    // command-line flags win over the file
    if let Some(base_url) = cli.base_url {
        config.server.base_url = base_url;
    }
    if let Some(transport) = cli.transport {
        config.server.transport = transport;
    }
    if let Some(token) = cli.token {
        config.auth.token = Some(token);
    }

    match cli.command {
        Command::TakeNext { queue } => commands::queue::take_next(&config, &queue).await,
        Command::QueueSize { queue } => commands::queue::queue_size(&config, &queue).await,
        Command::InProgress { wait } => {
            commands::queue::in_progress(&config, Duration::from_secs(wait)).await
        }
        Command::Watch { queue } => commands::queue::watch(&config, &queue).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(),
        },
    }
}
