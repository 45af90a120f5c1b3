// Parameter server main entry point.
mod observability;

use anyhow::{Context, Result};
use paramd::config::ServerConfig;
use paramd::server::ServerHandle;
use std::future::Future;

#[tokio::main]
async fn main() -> Result<()> {
    run_with_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("paramd")?;
    let config = ServerConfig::from_env_or_file()?;

    if let Some(metrics_bind) = config.metrics_bind {
        tokio::spawn(async move {
            if let Err(err) = observability::serve_metrics(metrics_handle, metrics_bind).await {
                tracing::warn!(error = %err, "metrics listener exited");
            }
        });
    } else {
        tracing::info!("metrics listener disabled (PARAMD_METRICS_BIND not set)");
    }
    if let Some(database) = &config.database {
        tracing::info!(path = %database, "storage path configured; parameters are kept in memory only");
    }

    let server = ServerHandle::start(config.clone())
        .await
        .context("start parameter server")?;
    tracing::info!(
        addr = %server.local_addr(),
        max_inflight = config.max_inflight_handlers,
        "parameter server listening"
    );

    // Block until SIGINT so the process stays alive.
    shutdown.await;
    server.shutdown();
    tracing::info!("parameter server stopped");
    Ok(())
}
