use std::process::ExitCode;

use anyhow::{Result, anyhow};
use cluster_coordination::{ClusterCoordinator, CoordinatorOptions, NatsConnector};
use config::CoordinatorConfig;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    runtime::Builder,
    signal,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

mod cli;
mod trace;

use cli::{Command, Parser};

fn main() -> Result<ExitCode> {
    if let Err(err) = dotenv::dotenv() {
        eprintln!(".env file not loaded: {err}");
    }
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.log, &config.log_format)?;
    debug!(?config, ?trace_config);

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    let rt = builder.build()?;

    let code = rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => {
                error!(?err, "confkeeper task failed");
                ExitCode::FAILURE
            }
            Ok(Err(err)) => {
                error!(?err, "exited with error");
                ExitCode::FAILURE
            }
            Ok(Ok(code)) => code,
        }
    });

    Ok(code)
}

async fn start(config: cli::Config) -> Result<ExitCode> {
    debug!(path = ?config.config_path, "parsing coordinator config");
    let mut coordinator_cfg = CoordinatorConfig::parse(&config.config_path)?;
    if let Some(collection) = &config.collection {
        coordinator_cfg = coordinator_cfg.with_collection(collection)?;
    }
    if let Some(address) = &config.host_address {
        coordinator_cfg = coordinator_cfg.with_host_address(address)?;
    }

    let options = CoordinatorOptions::from_config(&coordinator_cfg)?;
    let connector = NatsConnector::from_config(coordinator_cfg.coordination());
    info!(
        connect_string = options.endpoint().connect_string(),
        collection = %options.collection(),
        "starting cluster coordinator"
    );

    let token = CancellationToken::new();
    let signal_task = tokio::spawn(shutdown_signal(token.clone()));

    let coordinator =
        match ClusterCoordinator::open_with_interrupt(options, &connector, token.clone()).await {
            Ok(coordinator) => coordinator,
            Err(err) => {
                signal_task.abort();
                return Err(anyhow!(err).context("failed to start cluster coordinator"));
            }
        };

    let mut stdout = tokio::io::stdout();
    let result = run(&coordinator, &config.command, &mut stdout)
        .await
        .map(|found| if found { ExitCode::SUCCESS } else { ExitCode::from(1) });

    if let Err(err) = coordinator.close().await {
        warn!(?err, "failed to close cluster coordinator");
    }
    signal_task.abort();
    result
}

/// Execute one command against an open coordinator, writing its output to `out`.
/// Returns false when `exists` found nothing.
async fn run<W>(coordinator: &ClusterCoordinator, command: &Command, out: &mut W) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    match command {
        Command::Resolve => {
            let line = format!(
                "{}\t{}\n",
                coordinator.bundle_name(),
                coordinator.bundle_path()
            );
            out.write_all(line.as_bytes()).await?;
        }
        Command::Get { file } => {
            let bytes = coordinator
                .get_file(&coordinator.bundle_path(), file)
                .await?;
            out.write_all(&bytes).await?;
        }
        Command::Exists { path } => {
            let exists = coordinator.exists(path).await?;
            out.write_all(format!("{exists}\n").as_bytes()).await?;
            out.flush().await?;
            return Ok(exists);
        }
    }
    out.flush().await?;
    Ok(true)
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    let ret = signal::ctrl_c().await.map_err(|err| anyhow!(err));
    info!("interrupt received, aborting coordination calls");
    token.cancel();
    ret
}
