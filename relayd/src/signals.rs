//! Process controls (SPEC_FULL.md §6): the core consumes SIGHUP as a
//! liveness nudge and SIGINT/SIGTERM/SIGQUIT as a graceful-shutdown request.
//! Everything else — registering the process as a daemon, PID files, stdio
//! handling — is the external collaborator's job (see SPEC_FULL.md §1).

#[cfg(unix)]
pub async fn wait_for_shutdown_request() -> anyhow::Result<()> {
    use anyhow::Context as _;
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut quit = signal(SignalKind::quit()).context("failed to install SIGQUIT handler")?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                tracing::info!("received SIGHUP; no separate blocking wait to interrupt, continuing");
            }
            _ = interrupt.recv() => {
                tracing::info!("received SIGINT; shutting down");
                return Ok(());
            }
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM; shutting down");
                return Ok(());
            }
            _ = quit.recv() => {
                tracing::info!("received SIGQUIT (treated as SIGTERM); shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_request() -> anyhow::Result<()> {
    use anyhow::Context as _;
    tokio::signal::ctrl_c().await.context("CTRL_C signal failed")
}
