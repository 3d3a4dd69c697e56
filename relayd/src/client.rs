//! Client (SPEC_FULL.md §4.2 / §3): one connected management peer, driven by
//! its own per-connection task.

use std::net::SocketAddr;
use std::time::Duration;

use relayd_task::ShutdownSignal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, instrument, warn};

use crate::command::{dispatch_line, stream_ready_reply};
use crate::config::Config;
use crate::server::{ClientId, Server};
use crate::stream::Stream;

/// Management lines longer than this are truncated rather than grown without bound.
const MAX_LINE_BYTES: usize = 4096;

pub struct Client {
    pub id: ClientId,
    pub peer_addr: SocketAddr,
    pub host_str: String,
    pub service_str: String,
    pub nreq: u64,
    pub ntot: u64,
    pub quit: bool,
    pub stream: Stream,
}

impl Client {
    pub fn new(id: ClientId, peer_addr: SocketAddr, stream_port: u16) -> Self {
        Self {
            id,
            host_str: peer_addr.ip().to_string(),
            service_str: peer_addr.port().to_string(),
            peer_addr,
            nreq: 0,
            ntot: 0,
            quit: false,
            stream: Stream::new(peer_addr.ip().to_string(), stream_port),
        }
    }
}

/// Runs one client's entire lifetime: send stream-ready, then read and
/// dispatch lines until EOF, DIS, an I/O error, or a shutdown signal.
///
/// This is the per-connection task the accept loop (Connection Manager)
/// spawns; it owns `socket` and `client` exclusively for as long as it runs.
#[instrument(skip(socket, client, server, config, shutdown), fields(client = %client.peer_addr))]
pub async fn run_client(
    mut socket: TcpStream,
    mut client: Client,
    server: std::sync::Arc<Server>,
    config: std::sync::Arc<Config>,
    mut shutdown: ShutdownSignal,
) {
    let tick = Duration::from_millis(config.tick_millis);

    match client.stream.open(tick).await {
        Ok(()) => {
            let reply = stream_ready_reply(&config.command_names);
            if let Err(error) = socket.write_all(reply.as_bytes()).await {
                warn!(%error, "write error on management socket (stream-ready)");
            }
        }
        Err(error) => {
            warn!(%error, "failed to open stream; sending no stream-ready reply, SSU will report port 0");
        }
    }

    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();

        tokio::select! {
            result = read_line_capped(&mut reader, &mut line, MAX_LINE_BYTES) => {
                match result {
                    Ok(0) => break, // EOF
                    Ok(n) => {
                        let trimmed = line.trim_end_matches(['\n', '\r']);
                        let dispatch = dispatch_line(trimmed, &config.command_names, client.stream.port());

                        client.nreq += 1;
                        client.ntot += n as u64;

                        if let Some(reply) = dispatch.reply {
                            if let Err(error) = write_half.write_all(reply.as_bytes()).await {
                                warn!(%error, "write error on management socket");
                            }
                        }

                        if dispatch.quit {
                            client.quit = true;
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "read error on management socket");
                        break;
                    }
                }
            }
            _ = shutdown.wait() => {
                break;
            }
        }
    }

    client.stream.close().await;
    server.unregister(client.id);
    info!(
        host = %client.host_str,
        service = %client.service_str,
        nreq = client.nreq,
        ntot = client.ntot,
        "client disconnected"
    );
}

/// Reads one line, capped at `limit` bytes. A line exceeding the cap is
/// truncated rather than growing the buffer without bound; the remainder up
/// to the next `\n` is drained and discarded.
///
/// Deliberately does not use `AsyncBufReadExt::read_line`: that primitive
/// keeps extending its destination buffer across reads until it finds `\n`
/// or EOF, so a peer that never sends a newline would make a single
/// `read_line` call buffer an unbounded payload before this function ever
/// got a chance to apply `limit`. Instead this works directly off the
/// reader's own internal buffer (`fill_buf`/`consume`, bounded by its fixed
/// capacity) one chunk at a time, copying at most `limit` bytes total into
/// `line` regardless of how much the peer sends before a `\n` shows up.
async fn read_line_capped<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut String,
    limit: usize,
) -> std::io::Result<usize> {
    let mut total = 0usize;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total); // EOF
        }

        let newline_at = available.iter().position(|&b| b == b'\n');
        let chunk_len = newline_at.map_or(available.len(), |pos| pos + 1);

        let remaining_budget = limit.saturating_sub(line.len());
        if remaining_budget > 0 {
            let keep = chunk_len.min(remaining_budget);
            // Management traffic is expected to be ASCII; a lossy conversion
            // only ever affects bytes beyond a truncation boundary.
            line.push_str(&String::from_utf8_lossy(&available[..keep]));
        }

        total += chunk_len;
        reader.consume(chunk_len);

        if newline_at.is_some() {
            return Ok(total);
        }
    }
}
