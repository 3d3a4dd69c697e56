//! Server / Registry (SPEC_FULL.md §4.1): owns the listening socket and the
//! live-client bookkeeping shared between the Connection Manager and the
//! Telemetry Logger.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket};
use tracing::info;

use crate::config::Config;
use crate::error::{BindError, PortExhausted};

pub type ClientId = u64;

/// What the registry keeps about a live client: just enough for the
/// Telemetry Logger's 1 Hz aggregation pass. The rest of a client's state
/// (the `Client` value proper) is owned exclusively by its own task.
pub struct ClientEntry {
    pub bytes_sent: Arc<AtomicU64>,
}

struct Inner {
    clients: HashMap<ClientId, ClientEntry>,
    n_clients: usize,
    n_max_connected: usize,
    /// Wider than u16 so exhaustion is an explicit comparison, not a wrapping bug.
    next_stream_port: u32,
    bytes_sent_total: u64,
    tx_rate_kbps: f64,
}

pub struct Server {
    pub listener: TcpListener,
    pub config: Config,
    data: Mutex<Inner>,
    next_client_id: AtomicU64,
}

impl Server {
    pub async fn bind_and_listen(config: Config) -> Result<Self, BindError> {
        let addr: SocketAddr = ([0, 0, 0, 0], config.management_port).into();

        let socket = TcpSocket::new_v4().map_err(BindError::Socket)?;
        socket.set_reuseaddr(true).map_err(BindError::Socket)?;
        socket.bind(addr).map_err(|source| BindError::Bind { addr, source })?;

        let listener = socket
            .listen(1024)
            .map_err(|source| BindError::Listen { addr, source })?;

        info!(%addr, "Listener started successfully");

        Ok(Self {
            listener,
            data: Mutex::new(Inner {
                clients: HashMap::new(),
                n_clients: 0,
                n_max_connected: 0,
                next_stream_port: u32::from(config.stream_port_base),
                bytes_sent_total: 0,
                tx_rate_kbps: 0.0,
            }),
            next_client_id: AtomicU64::new(0),
            config,
        })
    }

    /// Registers a new client under the lock and returns its fresh id.
    pub fn register(&self, bytes_sent: Arc<AtomicU64>) -> ClientId {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);

        let mut data = self.data.lock();
        data.clients.insert(id, ClientEntry { bytes_sent });
        data.n_clients = data.clients.len();
        data.n_max_connected = data.n_max_connected.max(data.n_clients);

        id
    }

    /// Removes a client from the registry. Does not touch its socket or Stream;
    /// the caller (the client's own task) owns those and closes them itself.
    pub fn unregister(&self, id: ClientId) {
        let mut data = self.data.lock();
        data.clients.remove(&id);
        data.n_clients = data.clients.len();
    }

    /// Returns the next stream port, or `PortExhausted` once the range is used up.
    /// `next_stream_port` never decreases and is never reused after exhaustion.
    pub fn allocate_stream_port(&self) -> Result<u16, PortExhausted> {
        let mut data = self.data.lock();

        if data.next_stream_port > u32::from(u16::MAX) {
            return Err(PortExhausted);
        }

        let port = data.next_stream_port as u16;
        data.next_stream_port += 1;
        Ok(port)
    }

    pub fn n_clients(&self) -> usize {
        self.data.lock().n_clients
    }

    pub fn n_max_connected(&self) -> usize {
        self.data.lock().n_max_connected
    }

    /// Returns the most recently computed aggregate throughput snapshot
    /// without recomputing it; used on ticks that don't fall on the 1 Hz
    /// aggregation boundary.
    pub fn current_throughput(&self) -> (u64, f64) {
        let data = self.data.lock();
        (data.bytes_sent_total, data.tx_rate_kbps)
    }

    /// Sums `bytes_sent` across every live client, updates the aggregate
    /// counter and throughput estimate, and returns the new snapshot. Never
    /// called with the lock held across I/O: this is the entire critical
    /// section for the Telemetry Logger's 1 Hz aggregation tick.
    pub fn aggregate_throughput(&self) -> (u64, f64) {
        let mut data = self.data.lock();

        let new_total: u64 = data.clients.values().map(|c| c.bytes_sent.load(Ordering::Relaxed)).sum();
        let delta = new_total.saturating_sub(data.bytes_sent_total);
        data.tx_rate_kbps = delta as f64 / 1024.0;
        data.bytes_sent_total = new_total;

        (data.bytes_sent_total, data.tx_rate_kbps)
    }

    /// Clears any registry entries left behind by a client task that exited
    /// without unregistering itself (e.g. a panic). Under normal operation
    /// this is a no-op: each client task unregisters itself before returning.
    pub fn close_all(&self) {
        let mut data = self.data.lock();
        if !data.clients.is_empty() {
            tracing::warn!(count = data.clients.len(), "clearing stale registry entries at shutdown");
        }
        data.clients.clear();
        data.n_clients = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_server(port: u16) -> Server {
        let config = Config {
            management_port: port,
            ..Config::default()
        };
        Server::bind_and_listen(config).await.unwrap()
    }

    #[tokio::test]
    async fn stream_port_allocation_is_monotone_and_exhausts() {
        let server = make_server(0).await;
        let mut data = server.data.lock();
        data.next_stream_port = u32::from(u16::MAX);
        drop(data);

        assert_eq!(server.allocate_stream_port().unwrap(), u16::MAX);
        assert!(server.allocate_stream_port().is_err());
        assert!(server.allocate_stream_port().is_err());
    }

    #[tokio::test]
    async fn register_updates_counts_and_high_water_mark() {
        let server = make_server(0).await;
        let a = server.register(Arc::new(AtomicU64::new(0)));
        let b = server.register(Arc::new(AtomicU64::new(0)));
        assert_eq!(server.n_clients(), 2);
        assert_eq!(server.n_max_connected(), 2);

        server.unregister(a);
        assert_eq!(server.n_clients(), 1);
        assert_eq!(server.n_max_connected(), 2, "high-water mark never decreases");

        server.unregister(b);
        assert_eq!(server.n_clients(), 0);
        assert_eq!(server.n_max_connected(), 2);
    }

    #[tokio::test]
    async fn aggregate_throughput_sums_live_clients_and_computes_rate() {
        let server = make_server(0).await;
        let counter_a = Arc::new(AtomicU64::new(1000));
        let counter_b = Arc::new(AtomicU64::new(2000));
        server.register(Arc::clone(&counter_a));
        server.register(Arc::clone(&counter_b));

        let (total, rate) = server.aggregate_throughput();
        assert_eq!(total, 3000);
        assert!((rate - 3000.0 / 1024.0).abs() < 1e-9);

        counter_a.fetch_add(1024, Ordering::Relaxed);
        let (total2, rate2) = server.aggregate_throughput();
        assert_eq!(total2, 4024);
        assert!((rate2 - 1.0).abs() < 1e-9);
    }
}
