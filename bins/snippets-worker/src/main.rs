mod bridge;
mod config;
mod engine;
mod error;
mod fetcher;
mod orchestrator;
mod process;
mod reporter;


use anyhow::{bail, Context};
use bridge::RedisBridge;
use config::{RuntimeKind, WorkerConfig};
use engine::{DockerEngine, SandboxRuntime};
use fetcher::HttpFetcher;
use orchestrator::{Orchestrator, OrchestratorSettings};
use process::ProcessEngine;
use reporter::Reporter;
use snippets_common::config::ServiceConfig;
use snippets_common::redis;
use snippets_common::types::{Credential, InboundEvent};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, instrument, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Snippets worker booting...");

    let worker_config = WorkerConfig::from_env()?;

    let service_config = ServiceConfig::load_default()
        .map_err(|e| {
            error!("Failed to load service configuration: {}", e);
            error!("Make sure config/snippets.json exists or set SNIPPETS_CONFIG");
            e
        })?;
    let languages = service_config.language_table()?;

    info!("Loaded language profiles for: {:?}", languages.languages());

    let token = match worker_config.token.clone().or_else(|| service_config.token.clone()) {
        Some(token) => token,
        None => bail!("No download token configured, set SNIPPETS_TOKEN or \"token\" in the config file"),
    };

    let runtime: Arc<dyn SandboxRuntime> = match worker_config.runtime {
        RuntimeKind::Docker => {
            let engine = DockerEngine::connect()?;
            engine.ping().await.context("Docker daemon is not reachable")?;
            Arc::new(engine)
        }
        RuntimeKind::Process => {
            warn!("Using the local process runtime: snippets run unsandboxed on this host");
            Arc::new(ProcessEngine::new())
        }
    };

    info!("Sandbox runtime: {}", runtime.name());
    info!("Job folder: {}", service_config.folder.display());

    let client = ::redis::Client::open(worker_config.redis_url.as_str())?;
    let mut redis_conn = ::redis::aio::ConnectionManager::new(client).await?;

    info!("Connected to Redis: {}", worker_config.redis_url);

    let bridge = Arc::new(RedisBridge::new(redis_conn.clone(), worker_config.ack_marker.clone()));
    let settings = OrchestratorSettings {
        folder: service_config.folder.clone(),
        credential: Credential::new(token),
        identity: worker_config.bot_id.clone(),
        ack_marker: worker_config.ack_marker.clone(),
        keep_workdirs: service_config.keep_workdirs,
    };

    let orchestrator = Arc::new(Orchestrator::new(
        languages,
        settings,
        Arc::new(HttpFetcher::new()?),
        runtime,
        bridge.clone(),
        Reporter::new(bridge),
    ));

    // Setup graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, stopping intake...");
    };

    tokio::select! {
        _ = worker_loop(&mut redis_conn, &orchestrator) => {},
        _ = shutdown => {},
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip_all)]
async fn worker_loop(
    redis_conn: &mut ::redis::aio::ConnectionManager,
    orchestrator: &Arc<Orchestrator>,
) -> anyhow::Result<()> {
    loop {
        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_event(redis_conn, 5.0).await {
            Ok(Some(event)) => {
                if let InboundEvent::FileShared { file, .. } = &event {
                    debug!(file_id = %file.id, filetype = %file.filetype, "Received file");
                    // Keep metadata around so a later re-run can find the file
                    if let Err(e) = redis::store_file(redis_conn, file).await {
                        warn!(file_id = %file.id, error = %e, "Failed to store file metadata");
                    }
                }

                // Each event runs on its own task; the loop never waits on a job
                orchestrator.dispatch(event);
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}
