use anyhow::{Context, Result, anyhow};
use conparam_transport::{MAX_UDP_PAYLOAD, TransportConfig};
use serde::Deserialize;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};

// Server configuration sourced from environment variables with an optional file override.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // UDP listener bind address.
    pub udp_bind: SocketAddr,
    // Metrics HTTP listener bind address; disabled when unset.
    pub metrics_bind: Option<SocketAddr>,
    // Receive buffer size per datagram.
    pub max_datagram_bytes: usize,
    // Upper bound on concurrently running datagram handlers.
    pub max_inflight_handlers: usize,
    // Storage path from the deployment config. Parameters are only kept in memory.
    pub database: Option<String>,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 9165;
const DEFAULT_MAX_INFLIGHT_HANDLERS: usize = 1024;

// File keys. `host`/`port`/`database` match the legacy config.json layout.
#[derive(Debug, Default, Deserialize)]
struct ServerConfigOverride {
    host: Option<String>,
    port: Option<u16>,
    udp_bind: Option<String>,
    metrics_bind: Option<String>,
    max_datagram_bytes: Option<usize>,
    max_inflight_handlers: Option<usize>,
    database: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            udp_bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            metrics_bind: None,
            max_datagram_bytes: MAX_UDP_PAYLOAD,
            max_inflight_handlers: DEFAULT_MAX_INFLIGHT_HANDLERS,
            database: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let udp_bind = match std::env::var("PARAMD_UDP_BIND") {
            Ok(value) => value.parse().with_context(|| "parse PARAMD_UDP_BIND")?,
            Err(_) => {
                let host =
                    std::env::var("PARAMD_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
                let port = match std::env::var("PARAMD_PORT") {
                    Ok(value) => value.parse().with_context(|| "parse PARAMD_PORT")?,
                    Err(_) => DEFAULT_PORT,
                };
                resolve_bind(&host, port)?
            }
        };
        let metrics_bind = match std::env::var("PARAMD_METRICS_BIND") {
            Ok(value) if !value.trim().is_empty() => Some(
                value
                    .parse()
                    .with_context(|| "parse PARAMD_METRICS_BIND")?,
            ),
            _ => None,
        };
        let max_datagram_bytes = std::env::var("PARAMD_MAX_DATAGRAM_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.min(MAX_UDP_PAYLOAD))
            .unwrap_or(MAX_UDP_PAYLOAD);
        let max_inflight_handlers = std::env::var("PARAMD_MAX_INFLIGHT")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_INFLIGHT_HANDLERS);
        let database = std::env::var("PARAMD_DATABASE").ok();
        Ok(Self {
            udp_bind,
            metrics_bind,
            max_datagram_bytes,
            max_inflight_handlers,
            database,
        })
    }

    pub fn from_env_or_file() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("PARAMD_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read PARAMD_CONFIG: {path}"))?;
            config
                .apply_overrides(&contents)
                .with_context(|| format!("apply PARAMD_CONFIG: {path}"))?;
        }
        Ok(config)
    }

    /// Apply a YAML document on top of this config. JSON is accepted as well.
    pub fn apply_overrides(&mut self, contents: &str) -> Result<()> {
        let override_cfg: ServerConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse server config")?;
        if let Some(value) = override_cfg.udp_bind {
            self.udp_bind = value.parse().with_context(|| "parse udp_bind")?;
        } else if override_cfg.host.is_some() || override_cfg.port.is_some() {
            let host = override_cfg
                .host
                .unwrap_or_else(|| self.udp_bind.ip().to_string());
            let port = override_cfg.port.unwrap_or(self.udp_bind.port());
            self.udp_bind = resolve_bind(&host, port)?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = Some(value.parse().with_context(|| "parse metrics_bind")?);
        }
        if let Some(value) = override_cfg.max_datagram_bytes
            && value > 0
        {
            self.max_datagram_bytes = value.min(MAX_UDP_PAYLOAD);
        }
        if let Some(value) = override_cfg.max_inflight_handlers
            && value > 0
        {
            self.max_inflight_handlers = value;
        }
        if let Some(value) = override_cfg.database {
            self.database = Some(value);
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_datagram_bytes: self.max_datagram_bytes,
        }
    }
}

// Accepts literal IPs and resolvable host names such as `localhost`.
fn resolve_bind(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolve bind address {host}:{port}"))?
        .next()
        .ok_or_else(|| anyhow!("no address found for {host}:{port}"))
}
