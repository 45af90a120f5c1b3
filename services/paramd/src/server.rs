// UDP receive loop with a bounded pool of in-flight handlers.
use anyhow::{Context, Result};
use conparam_store::ParameterStore;
use conparam_transport::UdpEndpoint;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;

/// Number of datagram handlers currently running, mirrored into `paramd_inflight_handlers`.
#[derive(Debug, Default)]
pub struct InflightHandlers {
    current: AtomicUsize,
}

impl InflightHandlers {
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    fn enter(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> InflightSlot {
        let updated = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("paramd_inflight_handlers").set(updated as f64);
        InflightSlot {
            handlers: Arc::clone(self),
            _permit: permit,
        }
    }
}

// Held by a handler task; lowers the gauge when the handler finishes or is aborted.
struct InflightSlot {
    handlers: Arc<InflightHandlers>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for InflightSlot {
    fn drop(&mut self) {
        let updated = self
            .handlers
            .current
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::gauge!("paramd_inflight_handlers").set(updated as f64);
    }
}

pub async fn serve(
    endpoint: Arc<UdpEndpoint>,
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
    inflight: Arc<InflightHandlers>,
) -> Result<()> {
    let limiter = Arc::new(Semaphore::new(config.max_inflight_handlers.max(1)));
    loop {
        // Take a slot before reading so overload stalls the socket instead of piling up tasks.
        let permit = Arc::clone(&limiter)
            .acquire_owned()
            .await
            .context("handler limiter closed")?;
        let (payload, source) = match endpoint.recv().await {
            Ok(datagram) => datagram,
            Err(err) => {
                metrics::counter!("paramd_receive_errors_total").increment(1);
                tracing::warn!(error = %err, "udp receive failed");
                continue;
            }
        };

        let slot = inflight.enter(permit);
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let _slot = slot;
            dispatcher.handle_datagram(payload, source).await;
        });
    }
}

/// Running server bound to a UDP port.
///
/// ```no_run
/// use paramd::config::ServerConfig;
/// use paramd::server::ServerHandle;
///
/// async fn run() -> anyhow::Result<()> {
///     let config = ServerConfig {
///         udp_bind: "127.0.0.1:0".parse()?,
///         ..ServerConfig::default()
///     };
///     let server = ServerHandle::start(config).await?;
///     println!("listening on {}", server.local_addr());
///     server.shutdown();
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    store: Arc<ParameterStore>,
    inflight: Arc<InflightHandlers>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    /// Bind the endpoint and spawn the receive loop.
    ///
    /// Bind failures are returned here; nothing after this point is fatal.
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let endpoint =
            Arc::new(UdpEndpoint::bind(config.udp_bind, config.transport_config()).await?);
        let local_addr = endpoint.local_addr()?;
        let store = Arc::new(ParameterStore::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&store), endpoint.clone()));
        let inflight = Arc::new(InflightHandlers::default());
        let task = tokio::spawn(serve(endpoint, dispatcher, config, Arc::clone(&inflight)));
        Ok(Self {
            local_addr,
            store,
            inflight,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }

    /// Handlers running right now.
    pub fn inflight_handlers(&self) -> usize {
        self.inflight.current()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
