//! Connection Manager (SPEC_FULL.md §4.2): the accept loop. Spawns one task
//! per accepted client and, on shutdown, joins every one of them before
//! returning — this is what makes shutdown cooperative rather than a hard
//! abort.

use std::sync::Arc;

use relayd_task::ShutdownSignal;
use tokio::task::JoinSet;
use tracing::warn;

use crate::client::{run_client, Client};
use crate::config::Config;
use crate::server::Server;

pub async fn run(server: Arc<Server>, config: Arc<Config>, mut shutdown: ShutdownSignal) {
    // A `JoinSet` rather than a plain `Vec` of handles: without reaping finished
    // entries, a long-running daemon would accumulate one handle per connection
    // ever served for the lifetime of the process.
    let mut client_tasks: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            accepted = server.listener.accept() => {
                match accepted {
                    Ok((socket, peer_addr)) => {
                        match server.allocate_stream_port() {
                            Ok(stream_port) => {
                                let mut client = Client::new(0, peer_addr, stream_port);
                                let id = server.register(client.stream.bytes_sent_handle());
                                client.id = id;

                                let server = Arc::clone(&server);
                                let config = Arc::clone(&config);
                                let client_shutdown = shutdown.clone();

                                client_tasks.spawn(run_client(socket, client, server, config, client_shutdown));
                            }
                            Err(_port_exhausted) => {
                                warn!(%peer_addr, "stream port range exhausted; refusing connection");
                                drop(socket);
                            }
                        }
                    }
                    Err(error) => warn!(%error, "accept failed"),
                }
            }
            Some(result) = client_tasks.join_next(), if !client_tasks.is_empty() => {
                if let Err(error) = result {
                    warn!(%error, "client task panicked");
                }
            }
            _ = shutdown.wait() => {
                break;
            }
        }
    }

    while let Some(result) = client_tasks.join_next().await {
        if let Err(error) = result {
            warn!(%error, "client task panicked during shutdown");
        }
    }

    server.close_all();
}
