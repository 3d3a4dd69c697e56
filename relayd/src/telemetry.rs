//! Telemetry Logger (SPEC_FULL.md §4.5): samples host CPU/memory and the
//! aggregate stream throughput on a 100 ms tick, and appends one CSV row per
//! tick to an append-only sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relayd_task::{ShutdownSignal, Task};
use sysinfo::System;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::server::Server;

const CSV_HEADER: &str = "t_seconds,n_clients,n_max_connected,cpu_total,cpu_user,cpu_nice,cpu_sys,cpu_idle,cpu_frequency,\
mem_total_MB,mem_used_MB,mem_free_MB,mem_shared_MB,mem_buffered_MB,mem_cached_MB,mem_user_MB,mem_locked_MB,\
bytes_sent_total,tx_rate_kbps\n";

struct CpuSample {
    total: u64,
    user: u64,
    nice: u64,
    sys: u64,
    idle: u64,
    frequency: u64,
}

/// `sysinfo`'s cross-platform surface exposes per-core usage percentages, not
/// the absolute jiffie counters the original's `glibtop` binding reported.
/// `total` holds the global usage percentage; the category breakdown
/// (`user`/`nice`/`sys`) isn't available cross-platform so those columns are
/// reported as zero, and `idle` is derived as the complement of `total`. This
/// keeps the column set stable (see SPEC_FULL.md §4.5) rather than omitting
/// columns the on-disk format contract expects.
fn sample_cpu(system: &System) -> CpuSample {
    let total = system.global_cpu_usage().round() as u64;
    let frequency = system.cpus().first().map_or(0, |cpu| cpu.frequency());

    CpuSample {
        total,
        user: 0,
        nice: 0,
        sys: 0,
        idle: 100u64.saturating_sub(total),
        frequency,
    }
}

struct MemSample {
    total_mb: u64,
    used_mb: u64,
    free_mb: u64,
    shared_mb: u64,
    buffered_mb: u64,
    cached_mb: u64,
    user_mb: u64,
    locked_mb: u64,
}

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Shared/buffered/cached/user/locked memory aren't exposed by `sysinfo`'s
/// cross-platform API; they are reported as zero for the same reason the CPU
/// breakdown is partial (see [`sample_cpu`]).
fn sample_mem(system: &System) -> MemSample {
    MemSample {
        total_mb: system.total_memory() / BYTES_PER_MB,
        used_mb: system.used_memory() / BYTES_PER_MB,
        free_mb: system.free_memory() / BYTES_PER_MB,
        shared_mb: 0,
        buffered_mb: 0,
        cached_mb: 0,
        user_mb: 0,
        locked_mb: 0,
    }
}

pub struct TelemetryLogger<W> {
    server: Arc<Server>,
    sink: W,
    tick: Duration,
    aggregate_every: u32,
}

impl<W: AsyncWrite + Unpin + Send> TelemetryLogger<W> {
    pub fn new(server: Arc<Server>, sink: W, tick: Duration, aggregate_every: u32) -> Self {
        Self {
            server,
            sink,
            tick,
            aggregate_every,
        }
    }

    async fn write_row(&mut self, t_seconds: f64, cpu: &CpuSample, mem: &MemSample, bytes_sent_total: u64, tx_rate_kbps: f64) {
        let row = format!(
            "{t_seconds:.3},{n_clients},{n_max},{cpu_total},{cpu_user},{cpu_nice},{cpu_sys},{cpu_idle},{cpu_freq},\
{mem_total},{mem_used},{mem_free},{mem_shared},{mem_buf},{mem_cached},{mem_user},{mem_locked},{bytes_total},{tx_rate:.3}\n",
            n_clients = self.server.n_clients(),
            n_max = self.server.n_max_connected(),
            cpu_total = cpu.total,
            cpu_user = cpu.user,
            cpu_nice = cpu.nice,
            cpu_sys = cpu.sys,
            cpu_idle = cpu.idle,
            cpu_freq = cpu.frequency,
            mem_total = mem.total_mb,
            mem_used = mem.used_mb,
            mem_free = mem.free_mb,
            mem_shared = mem.shared_mb,
            mem_buf = mem.buffered_mb,
            mem_cached = mem.cached_mb,
            mem_user = mem.user_mb,
            mem_locked = mem.locked_mb,
            bytes_total = bytes_sent_total,
            tx_rate = tx_rate_kbps,
        );

        if let Err(error) = self.sink.write_all(row.as_bytes()).await {
            tracing::warn!(%error, "failed to write telemetry row");
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Task for TelemetryLogger<W> {
    type Output = ();

    const NAME: &'static str = "telemetry logger";

    async fn run(mut self, mut shutdown: ShutdownSignal) -> Self::Output {
        if let Err(error) = self.sink.write_all(CSV_HEADER.as_bytes()).await {
            tracing::warn!(%error, "failed to write telemetry header");
        }

        let mut system = System::new_all();
        let mut interval = tokio::time::interval(self.tick);
        let started = tokio::time::Instant::now();
        let mut tick_index: u64 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    system.refresh_cpu_usage();
                    system.refresh_memory();

                    tick_index += 1;
                    let is_aggregation_tick = self.aggregate_every > 0 && tick_index % u64::from(self.aggregate_every) == 0;
                    let (bytes_sent_total, tx_rate_kbps) = if is_aggregation_tick {
                        self.server.aggregate_throughput()
                    } else {
                        self.server.current_throughput()
                    };

                    let cpu = sample_cpu(&system);
                    let mem = sample_mem(&system);
                    let t_seconds = started.elapsed().as_secs_f64();

                    self.write_row(t_seconds, &cpu, &mem, bytes_sent_total, tx_rate_kbps).await;
                }
                _ = shutdown.wait() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::io::duplex;

    #[tokio::test]
    async fn header_is_written_once_and_rows_follow() {
        let config = Config {
            management_port: 0,
            ..Config::default()
        };
        let server = Arc::new(crate::server::Server::bind_and_listen(config).await.unwrap());

        let (sink, mut reader) = duplex(64 * 1024);
        let logger = TelemetryLogger::new(server, sink, Duration::from_millis(5), 2);
        let (handle, signal) = relayd_task::ShutdownHandle::new();
        let task = relayd_task::spawn_task(logger, signal);

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.signal();
        let _ = task.join().await;

        let mut buf = vec![0u8; 4096];
        let n = tokio::io::AsyncReadExt::read(&mut reader, &mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.starts_with(CSV_HEADER));
        assert!(text.lines().count() > 2, "expected header plus several data rows");
    }

    #[test]
    fn sample_cpu_derives_idle_as_complement_of_total() {
        let system = System::new();
        let cpu = sample_cpu(&system);
        assert_eq!(cpu.idle, 100 - cpu.total.min(100));
    }

    #[tokio::test]
    async fn aggregation_only_recomputes_on_boundary_ticks() {
        let config = Config {
            management_port: 0,
            ..Config::default()
        };
        let server = Arc::new(crate::server::Server::bind_and_listen(config).await.unwrap());
        let counter = Arc::new(AtomicU64::new(0));
        server.register(Arc::clone(&counter));

        counter.store(2048, Ordering::Relaxed);
        assert_eq!(server.current_throughput(), (0, 0.0), "not aggregated yet");

        let (total, rate) = server.aggregate_throughput();
        assert_eq!(total, 2048);
        assert!(rate > 0.0);
    }
}
