// paramctl: joins a namespace on a running server and mutates demo parameters.
use anyhow::{Context, Result};
use clap::Parser;
use conparam_client::ParamClient;
use conparam_test_harness::{demo_defaults, next_step};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "paramctl")]
#[command(about = "Drive a parameter server with the demo update loop")]
struct Args {
    /// Server address (host:port)
    #[arg(long, default_value = "127.0.0.1:9165")]
    backend: String,

    /// Namespace to join
    #[arg(long, default_value = "test")]
    namespace: String,

    /// String parameter that gets a suffix each step
    #[arg(long, default_value = "param1")]
    string_param: String,

    /// Numeric parameter that doubles each step
    #[arg(long, default_value = "param2")]
    number_param: String,

    /// Delay between steps in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Number of steps to run (0 = run until interrupted)
    #[arg(long, default_value = "0")]
    iterations: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let backend = resolve_backend(&args.backend)?;
    info!(%backend, namespace = %args.namespace, "joining namespace");

    let client = ParamClient::connect(
        backend,
        args.namespace.clone(),
        demo_defaults(&args.string_param, &args.number_param),
    )
    .await
    .context("connect to parameter server")?;

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut step = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }

        let current = client.params();
        println!(
            "{}",
            serde_json::to_string(&current).context("render parameters")?
        );

        let next = next_step(&current, &args.string_param, &args.number_param);
        if next.is_empty() {
            warn!(step, "no demo parameter left to update");
        } else if let Err(err) = client.set_many(next).await {
            warn!(step, error = %err, "parameter update failed");
        }

        step += 1;
        if args.iterations > 0 && step >= args.iterations {
            break;
        }
    }

    info!(steps = step, "paramctl finished");
    Ok(())
}

fn resolve_backend(backend: &str) -> Result<SocketAddr> {
    backend
        .to_socket_addrs()
        .with_context(|| format!("resolve backend {backend}"))?
        .next()
        .with_context(|| format!("backend {backend} resolved to no address"))
}
