use std::net::SocketAddr;

use thiserror::Error;

/// Fatal at startup: the process aborts rather than trying to recover.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to create TCP socket")]
    Socket(#[source] std::io::Error),
    #[error("failed to bind {addr}")]
    Bind { addr: SocketAddr, source: std::io::Error },
    #[error("failed to listen on {addr}")]
    Listen { addr: SocketAddr, source: std::io::Error },
}

/// A single accept attempt failed for a transient, non-fatal reason.
#[derive(Debug, Error)]
#[error("accept failed")]
pub struct AcceptError(#[from] pub std::io::Error);

/// `next_stream_port` has reached the top of the u16 range.
#[derive(Debug, Error)]
#[error("stream port range exhausted")]
pub struct PortExhausted;

/// Raised while a [`crate::stream::Stream`] is being opened for a new client.
#[derive(Debug, Error)]
pub enum StreamOpenError {
    #[error("failed to resolve stream peer address")]
    Resolve(#[source] std::io::Error),
    #[error("no usable address for stream peer")]
    NoUsableAddress,
    #[error("failed to create or connect stream socket")]
    Socket(#[source] std::io::Error),
}
