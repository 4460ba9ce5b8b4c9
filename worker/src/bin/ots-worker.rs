//! OTS worker binary - executes test tasks for one or more device groups

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use transport::{NatsOptions, NatsTransport};
use worker::{TaskBroker, WorkerConfig, WORKER_VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::parse_config();

    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    info!("Starting OTS worker {}", WORKER_VERSION);
    info!("Configuration:");
    info!("  NATS URL: {}", config.nats_url);
    info!("  Device groups: {:?}", config.queues());
    info!("  Hard timeout grace: {:?}", config.hard_timeout_grace());
    info!("  Reconnect back-off: {:?}", config.reconnect_backoff());
    info!("  Origin: {}", config.worker_hostname());

    if config.queues().is_empty() {
        anyhow::bail!("at least one routing key is required");
    }

    let transport = NatsTransport::connect(NatsOptions {
        url: config.nats_url.clone(),
        creds_path: config.nats_creds_path.clone(),
        ..NatsOptions::default()
    })
    .await?;

    let broker = TaskBroker::new(Arc::new(transport), config);
    let shutdown = broker.shutdown_token();
    tokio::spawn(watch_signals(shutdown));

    let stats = broker.run().await;
    info!(
        succeeded = stats.tasks_succeeded,
        failed = stats.tasks_failed,
        "OTS worker exited"
    );
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}
