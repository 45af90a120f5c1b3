//! Per-datagram dispatch.
//!
//! Every inbound datagram is classified as a registration or an update:
//! - **Registration** (`__namespace__` present): join the namespace, then unicast the
//!   namespace snapshot back to the sender when it is non-empty.
//! - **Update**: resolve the sender's namespace, apply every field, then forward the
//!   sender's bytes to every other subscriber of that namespace.
//!
//! Nothing here returns an error. Malformed datagrams, updates from unknown
//! addresses and failed sends are logged, counted and dropped so one bad client
//! never disturbs the others.
use bytes::Bytes;
use conparam_store::ParameterStore;
use conparam_transport::DatagramSink;
use conparam_wire::{Envelope, Params, encode_params};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    // Payload was not a JSON object or carried a non-string namespace.
    Decode,
    // Update from an address that never registered.
    Unregistered,
}

/// What a single datagram turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Registered {
        namespace: String,
        snapshot_sent: bool,
    },
    Broadcast {
        namespace: String,
        delivered: usize,
        failed: usize,
    },
    Dropped(DropReason),
}

pub struct Dispatcher {
    store: Arc<ParameterStore>,
    sink: Arc<dyn DatagramSink>,
}

impl Dispatcher {
    pub fn new(store: Arc<ParameterStore>, sink: Arc<dyn DatagramSink>) -> Self {
        Self { store, sink }
    }

    pub fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }

    pub async fn handle_datagram(&self, payload: Bytes, source: SocketAddr) -> Dispatch {
        metrics::counter!("paramd_datagrams_received_total").increment(1);
        let envelope = match Envelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                metrics::counter!("paramd_decode_errors_total").increment(1);
                tracing::warn!(%source, error = %err, bytes = payload.len(), "dropping undecodable datagram");
                return Dispatch::Dropped(DropReason::Decode);
            }
        };
        match envelope {
            Envelope::Register { namespace } => self.register(namespace, source).await,
            Envelope::Update { params } => self.update(payload, params, source).await,
        }
    }

    async fn register(&self, namespace: String, source: SocketAddr) -> Dispatch {
        let joined = self.store.register(&namespace, source);
        metrics::counter!("paramd_registrations_total").increment(1);
        metrics::gauge!("paramd_namespaces").set(self.store.namespace_count() as f64);
        tracing::info!(%source, namespace = %namespace, joined, "client registered");

        let snapshot = self.store.snapshot(&namespace);
        if snapshot.is_empty() {
            return Dispatch::Registered {
                namespace,
                snapshot_sent: false,
            };
        }
        let reply = match encode_params(&snapshot) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(%source, namespace = %namespace, error = %err, "snapshot encode failed");
                return Dispatch::Registered {
                    namespace,
                    snapshot_sent: false,
                };
            }
        };
        let snapshot_sent = match self.sink.send_to(&reply, source).await {
            Ok(_) => {
                metrics::counter!("paramd_snapshot_replies_total").increment(1);
                true
            }
            Err(err) => {
                metrics::counter!("paramd_send_failures_total").increment(1);
                tracing::warn!(dest = %source, namespace = %namespace, error = %err, "snapshot send failed");
                false
            }
        };
        Dispatch::Registered {
            namespace,
            snapshot_sent,
        }
    }

    async fn update(&self, payload: Bytes, params: Params, source: SocketAddr) -> Dispatch {
        let keys = params.len();
        if tracing::enabled!(tracing::Level::DEBUG) {
            for (key, value) in &params {
                tracing::debug!(%source, key = %key, value = %value, "parameter update received");
            }
        }
        let Some(namespace) = self.store.apply_update(source, params) else {
            metrics::counter!("paramd_unregistered_updates_total").increment(1);
            tracing::info!(%source, "dropping update from client without a namespace");
            return Dispatch::Dropped(DropReason::Unregistered);
        };
        metrics::counter!("paramd_updates_total").increment(keys as u64);

        // Store writes are done; fan out the sender's bytes untouched.
        let mut delivered = 0usize;
        let mut failed = 0usize;
        for dest in self.store.subscribers(&namespace) {
            if dest == source {
                continue;
            }
            match self.sink.send_to(&payload, dest).await {
                Ok(_) => delivered += 1,
                Err(err) => {
                    failed += 1;
                    tracing::warn!(%dest, namespace = %namespace, error = %err, "broadcast send failed");
                }
            }
        }
        metrics::counter!("paramd_broadcast_sends_total").increment(delivered as u64);
        if failed > 0 {
            metrics::counter!("paramd_send_failures_total").increment(failed as u64);
        }
        tracing::debug!(%source, namespace = %namespace, keys, delivered, failed, "update broadcast");
        Dispatch::Broadcast {
            namespace,
            delivered,
            failed,
        }
    }
}
