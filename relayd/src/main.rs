use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use relayd::config::Config;
use relayd::server::Server;
use relayd::{connection_manager, signals, telemetry};
use relayd_task::ShutdownHandle;

fn main() -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the async runtime")?;

    rt.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "relayd.json".to_owned());
    let config = Config::load_from_file(std::path::Path::new(&config_path)).context("failed to load configuration")?;

    let _logger_guard = relayd_log::init(&config.log_filter).context("failed to initialize logging")?;

    let telemetry_sink = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.telemetry_log_path)
        .await
        .with_context(|| format!("failed to open telemetry log at {}", config.telemetry_log_path.display()))?;

    let tick = Duration::from_millis(config.tick_millis);
    let aggregate_every = config.telemetry_aggregate_every;

    let server = Arc::new(Server::bind_and_listen(config.clone()).await.context("failed to start listener")?);
    let config = Arc::new(config);

    // Connection Manager and its client tasks share one shutdown broadcast;
    // the Telemetry Logger gets its own, signaled only after every client has
    // been torn down (SPEC_FULL.md §5 shutdown sequence).
    let (io_shutdown, io_signal) = ShutdownHandle::new();
    let (log_shutdown, log_signal) = ShutdownHandle::new();

    let manager_task = tokio::task::spawn(connection_manager::run(
        Arc::clone(&server),
        Arc::clone(&config),
        io_signal,
    ));

    let logger = telemetry::TelemetryLogger::new(Arc::clone(&server), telemetry_sink, tick, aggregate_every);
    let logger_task = relayd_task::spawn_task(logger, log_signal);

    signals::wait_for_shutdown_request().await?;

    io_shutdown.signal();
    manager_task.await.context("connection manager task panicked")?;

    log_shutdown.signal();
    logger_task.join().await.context("telemetry logger task panicked")?;

    Ok(())
}
