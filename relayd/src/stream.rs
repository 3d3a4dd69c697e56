//! Stream (SPEC_FULL.md §4.4): a client's per-connection UDP telemetry
//! side-channel, daemon → peer only.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relayd_task::ChildTask;
use tokio::net::UdpSocket;
use tracing::{instrument, warn};

use crate::error::StreamOpenError;

/// Builds one fixed-shape telemetry frame, e.g. `$12:00:00.000&0|0.000,1|0.000,2|0.000\n`.
///
/// The channel/value content is placeholder, as in the system this was
/// distilled from; only the frame shape is part of the wire contract.
fn build_frame() -> String {
    let now = time::OffsetDateTime::now_utc().time();
    format!(
        "${:02}:{:02}:{:02}.{:03}&0|0.000,1|0.000,2|0.000\n",
        now.hour(),
        now.minute(),
        now.second(),
        now.millisecond(),
    )
}

pub struct Stream {
    peer_host: String,
    port: u16,
    open: Arc<AtomicBool>,
    bytes_sent: Arc<AtomicU64>,
    task: Option<ChildTask<()>>,
}

impl Stream {
    pub fn new(peer_host: String, port: u16) -> Self {
        Self {
            peer_host,
            port,
            open: Arc::new(AtomicBool::new(false)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// The port reported to a client via SSU. Only meaningful once `open`
    /// has succeeded: per SPEC_FULL.md §7, a Stream whose `open` failed
    /// reports port `0` rather than the port it was merely allocated.
    pub fn port(&self) -> u16 {
        if self.is_open() {
            self.port
        } else {
            0
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// A clone of the atomic counter backing [`Stream::bytes_sent`], for the
    /// registry to hand to the Telemetry Logger without borrowing the Stream.
    pub fn bytes_sent_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes_sent)
    }

    /// Resolves the peer, connects a UDP socket to it, and spawns the
    /// periodic sender. On failure, `open` stays false: the client remains
    /// registered (DIS/PNG keep working), but [`Stream::port`] reports `0`
    /// rather than the allocated-but-unusable port.
    #[instrument(skip(self), fields(peer = %self.peer_host, port = self.port))]
    pub async fn open(&mut self, tick: Duration) -> Result<(), StreamOpenError> {
        let target: SocketAddr = tokio::net::lookup_host((self.peer_host.as_str(), self.port))
            .await
            .map_err(StreamOpenError::Resolve)?
            .next()
            .ok_or(StreamOpenError::NoUsableAddress)?;

        let bind_addr: SocketAddr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }
            .parse()
            .expect("hardcoded bind address is valid");

        let socket = UdpSocket::bind(bind_addr).await.map_err(StreamOpenError::Socket)?;
        socket.connect(target).await.map_err(StreamOpenError::Socket)?;

        self.open.store(true, Ordering::Relaxed);

        let open = Arc::clone(&self.open);
        let bytes_sent = Arc::clone(&self.bytes_sent);
        self.task = Some(ChildTask::spawn(sender_loop(socket, open, bytes_sent, tick)));

        Ok(())
    }

    /// Signals the sender to stop and joins it before returning, so that no
    /// further bytes are ever sent to this peer once `close` completes.
    pub async fn close(&mut self) {
        self.open.store(false, Ordering::Relaxed);
        if let Some(task) = self.task.take() {
            let _ = task.join().await;
        }
    }
}

async fn sender_loop(socket: UdpSocket, open: Arc<AtomicBool>, bytes_sent: Arc<AtomicU64>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);

    while open.load(Ordering::Relaxed) {
        interval.tick().await;

        let frame = build_frame();
        match socket.send(frame.as_bytes()).await {
            Ok(n) if n == frame.len() => {
                bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
            }
            Ok(n) => warn!(sent = n, expected = frame.len(), "short write on stream socket"),
            Err(error) => warn!(%error, "write error on stream socket"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_matches_expected_shape() {
        let frame = build_frame();
        assert!(frame.starts_with('$'));
        assert!(frame.ends_with('\n'));
        assert!(frame.contains("&0|0.000,1|0.000,2|0.000"));
    }

    #[tokio::test]
    async fn open_then_close_bounds_sender_lifetime() {
        let mut stream = Stream::new("127.0.0.1".to_owned(), 19876);
        stream.open(Duration::from_millis(20)).await.unwrap();
        assert!(stream.is_open());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(stream.bytes_sent() > 0);

        stream.close().await;
        assert!(!stream.is_open());

        let sent_at_close = stream.bytes_sent();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(stream.bytes_sent(), sent_at_close, "no bytes sent after close");
    }

    #[test]
    fn port_reports_zero_until_open_succeeds() {
        // `open()` only ever flips `self.open` to `true` after every fallible
        // step (resolve, bind, connect) has already succeeded, so any failure
        // path - `ResolveError`, `NoUsableAddress`, or `SocketError` - leaves
        // `open` false and this same state holds. A freshly constructed,
        // never-opened Stream models that state without depending on a real
        // (and possibly network-less) DNS failure to reach it.
        let stream = Stream::new("127.0.0.1".to_owned(), 19877);
        assert!(!stream.is_open());
        assert_eq!(stream.port(), 0, "a Stream whose open never succeeded must report port 0");
    }

    #[tokio::test]
    async fn port_reports_the_allocated_port_once_open_succeeds() {
        let mut stream = Stream::new("127.0.0.1".to_owned(), 19879);
        stream.open(Duration::from_millis(20)).await.unwrap();
        assert_eq!(stream.port(), 19879);
        stream.close().await;
    }
}
