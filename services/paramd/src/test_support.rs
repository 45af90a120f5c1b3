// In-memory datagram sink for dispatcher tests.
use async_trait::async_trait;
use bytes::Bytes;
use conparam_transport::DatagramSink;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;

#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    sent: Mutex<Vec<(Bytes, SocketAddr)>>,
    failing: Mutex<HashSet<SocketAddr>>,
}

impl RecordingSink {
    // Every later send to `dest` fails with a connection-refused error.
    pub(crate) fn fail_for(&self, dest: SocketAddr) {
        self.failing.lock().insert(dest);
    }

    pub(crate) fn sent(&self) -> Vec<(Bytes, SocketAddr)> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_to(&self, dest: SocketAddr) -> Vec<Bytes> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, to)| *to == dest)
            .map(|(payload, _)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl DatagramSink for RecordingSink {
    async fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        if self.failing.lock().contains(&dest) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "destination unreachable",
            ));
        }
        self.sent
            .lock()
            .push((Bytes::copy_from_slice(payload), dest));
        Ok(payload.len())
    }
}
