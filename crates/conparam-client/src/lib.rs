// Client side of the parameter protocol: join a namespace, keep a local mirror of its
// parameters, and push local changes to the server.
use conparam_wire::{Envelope, NAMESPACE_FIELD, Params, Value};
use parking_lot::RwLock;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const RECV_BUFFER_BYTES: usize = 64 * 1024;
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire error: {0}")]
    Wire(#[from] conparam_wire::Error),
    #[error("timed out waiting for parameter `{0}`")]
    Timeout(String),
}

#[derive(Debug)]
struct Shared {
    params: RwLock<Params>,
    // Woken after every merged datagram.
    changed: Notify,
}

impl Shared {
    fn merge(&self, incoming: Params) {
        {
            let mut params = self.params.write();
            for (key, value) in incoming {
                params.insert(key, value);
            }
        }
        self.changed.notify_waiters();
    }
}

/// Namespace member that mirrors the namespace's parameters.
///
/// ```no_run
/// use conparam_client::ParamClient;
/// use conparam_wire::{Params, Value};
/// use std::time::Duration;
///
/// async fn tweak() -> conparam_client::Result<()> {
///     let mut defaults = Params::new();
///     defaults.insert("param1".into(), Value::from("value1"));
///     let backend = "127.0.0.1:9165".parse().expect("addr");
///     let client = ParamClient::connect(backend, "test", defaults).await?;
///     client.set("param2", Value::from(2)).await?;
///     let current = client.wait_for("param1", Duration::from_secs(1)).await?;
///     println!("param1 = {current}");
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct ParamClient {
    socket: Arc<UdpSocket>,
    backend: SocketAddr,
    namespace: String,
    shared: Arc<Shared>,
    recv_task: JoinHandle<()>,
}

impl ParamClient {
    /// Bind an ephemeral socket, register with `backend`, and start mirroring.
    ///
    /// `defaults` seed the local mirror; they are not sent to the server.
    pub async fn connect(
        backend: SocketAddr,
        namespace: impl Into<String>,
        defaults: Params,
    ) -> Result<Self> {
        let bind = if backend.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = Arc::new(UdpSocket::bind(bind).await?);
        let namespace = namespace.into();
        let registration = Envelope::register(namespace.clone()).encode()?;
        socket.send_to(&registration, backend).await?;
        tracing::debug!(%backend, namespace = %namespace, "registration sent");

        let shared = Arc::new(Shared {
            params: RwLock::new(defaults),
            changed: Notify::new(),
        });
        let recv_task = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            backend,
            Arc::clone(&shared),
        ));
        Ok(Self {
            socket,
            backend,
            namespace,
            shared,
            recv_task,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.shared.params.read().get(key).cloned()
    }

    /// Copy of the whole local mirror.
    pub fn params(&self) -> Params {
        self.shared.params.read().clone()
    }

    /// Wait until `key` is present in the local mirror.
    pub async fn wait_for(&self, key: &str, timeout: Duration) -> Result<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            // Create the waiter before checking so a merge in between is not missed.
            let changed = self.shared.changed.notified();
            if let Some(value) = self.get(key) {
                return Ok(value);
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return Err(ClientError::Timeout(key.to_string()));
            }
        }
    }

    /// Store `value` locally and send it to the other namespace members.
    pub async fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let mut params = Params::new();
        params.insert(key.into(), value);
        self.set_many(params).await
    }

    /// Like [`ParamClient::set`] for several keys in a single datagram.
    pub async fn set_many(&self, params: Params) -> Result<()> {
        if params.contains_key(NAMESPACE_FIELD) {
            return Err(conparam_wire::Error::ReservedKey.into());
        }
        let payload = Envelope::update(params.clone()).encode()?;
        self.shared.merge(params);
        self.socket.send_to(&payload, self.backend).await?;
        Ok(())
    }
}

impl Drop for ParamClient {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, backend: SocketAddr, shared: Arc<Shared>) {
    let mut buf = vec![0u8; RECV_BUFFER_BYTES];
    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                tracing::warn!(error = %err, "parameter receive failed");
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                continue;
            }
        };
        if source != backend {
            tracing::debug!(%source, "ignoring datagram from unknown peer");
            continue;
        }
        match Envelope::decode(&buf[..len]) {
            Ok(Envelope::Update { params }) => shared.merge(params),
            Ok(Envelope::Register { namespace }) => {
                tracing::debug!(namespace = %namespace, "ignoring registration echo");
            }
            Err(err) => {
                tracing::warn!(%source, error = %err, "ignoring undecodable parameter datagram");
            }
        }
    }
}
