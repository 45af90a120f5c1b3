// UDP transport primitives.
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Largest payload that fits in a single IPv4 UDP datagram.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Transport-level configuration defaults.
///
/// ```
/// use conparam_transport::{MAX_UDP_PAYLOAD, TransportConfig};
///
/// let config = TransportConfig::default();
/// assert_eq!(config.max_datagram_bytes, MAX_UDP_PAYLOAD);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    // Receive buffer size, capped at MAX_UDP_PAYLOAD; longer datagrams are truncated.
    pub max_datagram_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_datagram_bytes: MAX_UDP_PAYLOAD,
        }
    }
}

/// Outbound side of the transport.
///
/// Implementations must tolerate concurrent calls from many handler tasks.
#[async_trait]
pub trait DatagramSink: Send + Sync {
    async fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize>;
}

/// Bound UDP socket shared by the receive loop and every handler.
///
/// ```no_run
/// use conparam_transport::{DatagramSink, TransportConfig, UdpEndpoint};
///
/// async fn echo_once() -> anyhow::Result<()> {
///     let bind = "127.0.0.1:9165".parse()?;
///     let endpoint = UdpEndpoint::bind(bind, TransportConfig::default()).await?;
///     let (payload, source) = endpoint.recv().await?;
///     endpoint.send_to(&payload, source).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct UdpEndpoint {
    socket: UdpSocket,
    // Scratch space reused by every receive; only the received bytes are copied out.
    recv_buf: Mutex<Vec<u8>>,
}

impl UdpEndpoint {
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("bind UDP endpoint on {addr}"))?;
        let recv_buf = vec![0u8; config.max_datagram_bytes.clamp(1, MAX_UDP_PAYLOAD)];
        Ok(Self {
            socket,
            recv_buf: Mutex::new(recv_buf),
        })
    }

    /// Wait for the next datagram and return its payload with the sender address.
    ///
    /// The returned payload owns exactly the received bytes.
    pub async fn recv(&self) -> Result<(Bytes, SocketAddr)> {
        let mut buf = self.recv_buf.lock().await;
        let (len, source) = self
            .socket
            .recv_from(&mut buf)
            .await
            .context("receive datagram")?;
        Ok((Bytes::copy_from_slice(&buf[..len]), source))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("read UDP local address")
    }
}

#[async_trait]
impl DatagramSink for UdpEndpoint {
    async fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(payload, dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().expect("addr")
    }

    #[tokio::test]
    async fn datagram_round_trip_between_endpoints() {
        let server = UdpEndpoint::bind(loopback(), TransportConfig::default())
            .await
            .expect("bind server");
        let client = UdpEndpoint::bind(loopback(), TransportConfig::default())
            .await
            .expect("bind client");
        let server_addr = server.local_addr().expect("server addr");
        let client_addr = client.local_addr().expect("client addr");

        let sent = client
            .send_to(br#"{"k":1}"#, server_addr)
            .await
            .expect("send");
        assert_eq!(sent, 7);

        let (payload, source) = timeout(Duration::from_secs(2), server.recv())
            .await
            .expect("recv timeout")
            .expect("recv");
        assert_eq!(payload.as_ref(), br#"{"k":1}"#);
        assert_eq!(source, client_addr);
    }

    #[tokio::test]
    async fn endpoint_is_shareable_across_tasks() {
        let server = UdpEndpoint::bind(loopback(), TransportConfig::default())
            .await
            .expect("bind server");
        let sender = std::sync::Arc::new(
            UdpEndpoint::bind(loopback(), TransportConfig::default())
                .await
                .expect("bind sender"),
        );
        let dest = server.local_addr().expect("addr");

        let mut tasks = Vec::new();
        for i in 0..4u8 {
            let sender = std::sync::Arc::clone(&sender);
            tasks.push(tokio::spawn(async move { sender.send_to(&[i], dest).await }));
        }
        for task in tasks {
            task.await.expect("join").expect("send");
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            let (payload, _) = timeout(Duration::from_secs(2), server.recv())
                .await
                .expect("recv timeout")
                .expect("recv");
            seen.push(payload[0]);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn small_datagram_does_not_retain_receive_buffer() {
        let server = UdpEndpoint::bind(loopback(), TransportConfig::default())
            .await
            .expect("bind server");
        let client = UdpEndpoint::bind(loopback(), TransportConfig::default())
            .await
            .expect("bind client");
        client
            .send_to(b"{}", server.local_addr().expect("addr"))
            .await
            .expect("send");

        let (payload, _) = timeout(Duration::from_secs(2), server.recv())
            .await
            .expect("recv timeout")
            .expect("recv");
        assert_eq!(payload.as_ref(), b"{}");
        let owned = payload.try_into_mut().expect("payload is uniquely owned");
        assert!(owned.capacity() < 1024, "capacity {}", owned.capacity());
    }

    #[tokio::test]
    async fn long_datagram_is_truncated_to_configured_size() {
        let server = UdpEndpoint::bind(
            loopback(),
            TransportConfig {
                max_datagram_bytes: 4,
            },
        )
        .await
        .expect("bind server");
        let client = UdpEndpoint::bind(loopback(), TransportConfig::default())
            .await
            .expect("bind client");
        client
            .send_to(br#"{"k":1}"#, server.local_addr().expect("addr"))
            .await
            .expect("send");

        let (payload, _) = timeout(Duration::from_secs(2), server.recv())
            .await
            .expect("recv timeout")
            .expect("recv");
        assert_eq!(payload.as_ref(), br#"{"k""#);
    }

    #[tokio::test]
    async fn bind_conflict_is_reported_with_context() {
        let first = UdpEndpoint::bind(loopback(), TransportConfig::default())
            .await
            .expect("bind first");
        let taken = first.local_addr().expect("addr");
        let err = UdpEndpoint::bind(taken, TransportConfig::default())
            .await
            .expect_err("port already bound");
        assert!(err.to_string().contains("bind UDP endpoint"));
    }
}
