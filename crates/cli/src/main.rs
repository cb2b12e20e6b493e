use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use queuectl_cli::bootstrap::Settings;
use queuectl_cli::cli::{Cli, Command, ConfigCommand, DlqCommand, WorkerCommand};
use queuectl_cli::{commands, dashboard, shutdown};
use queuectl_observability::LogFormat;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let format = if cli.command.is_long_running() {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    queuectl_observability::init(format);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let settings = Settings::from_env()?;
    let mut out = std::io::stdout();

    // Stopping only needs the pid file, not the database.
    if let Command::Worker(WorkerCommand::Stop) = command {
        return commands::stop_workers(&settings.marker(), &mut out);
    }

    let store = Arc::new(settings.open_store().await?);

    let result = match command {
        Command::Enqueue { job } => commands::enqueue(store.as_ref(), &job, &mut out)
            .await
            .map(|_| ()),
        Command::Worker(WorkerCommand::Start { count }) => {
            let token = shutdown::install_shutdown_handler()?;
            commands::run_workers(store.clone(), settings.marker(), count, token).await
        }
        Command::Worker(WorkerCommand::Stop) => Ok(()),
        Command::Status => commands::status(store.as_ref(), &settings.marker(), &mut out).await,
        Command::List { state } => commands::list(store.as_ref(), state, &mut out).await,
        Command::Dlq(DlqCommand::List) => commands::dlq_list(store.as_ref(), &mut out).await,
        Command::Dlq(DlqCommand::Retry { id }) => {
            commands::dlq_retry(store.as_ref(), &id, &mut out).await
        }
        Command::Config(ConfigCommand::Set { key, value }) => {
            commands::config_set(store.as_ref(), &key, &value, &mut out).await
        }
        Command::Config(ConfigCommand::Get { key }) => {
            commands::config_get(store.as_ref(), &key, &mut out).await
        }
        Command::Config(ConfigCommand::List) => {
            commands::config_list(store.as_ref(), &mut out).await
        }
        Command::Show { id } => commands::show(store.as_ref(), &id, &mut out).await,
        Command::Dashboard(args) => {
            let token = shutdown::install_shutdown_handler()?;
            let addr = format!("{}:{}", args.host, args.port);
            dashboard::serve(store.clone(), &addr, token).await
        }
    };

    store.close().await;
    result
}
