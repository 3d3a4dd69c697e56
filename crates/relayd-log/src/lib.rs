//! Operational (`tracing`) logging setup.
//!
//! This is distinct from the telemetry CSV sink the daemon writes to: this
//! crate wires up human-facing diagnostics (accepts, errors, shutdown),
//! never the per-tick data rows.

use anyhow::Context as _;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Guard that must be kept alive for the lifetime of the process; dropping it
/// flushes and detaches the subscriber.
pub struct LoggerGuard;

pub fn init(filter: &str) -> anyhow::Result<LoggerGuard> {
    let env_filter = EnvFilter::try_new(filter).context("invalid built-in filtering directives (this is a bug)")?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();

    Ok(LoggerGuard)
}
