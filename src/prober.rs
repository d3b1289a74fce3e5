//! TCP port probing across candidate addresses
//!
//! Two entry points: [`NetworkProber::probe_addresses`] for a short
//! allow-list, and [`NetworkProber::probe_subnet`] for a whole `/24`. The
//! subnet scan splits hosts into chunks and runs each chunk on its own OS
//! thread with a private single-threaded runtime; when those workers cannot
//! be used it falls back to one semaphore-bounded scan on the caller's
//! runtime.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};

/// Result of a single port check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Open,
    Closed,
    TimedOut,
}

/// Check whether `port` accepts TCP connections on `ip`
pub async fn check_port(ip: Ipv4Addr, port: u16, probe_timeout: Duration) -> PortState {
    match timeout(probe_timeout, TcpStream::connect((ip, port))).await {
        Ok(Ok(_stream)) => PortState::Open,
        Ok(Err(_)) => PortState::Closed,
        Err(_) => PortState::TimedOut,
    }
}

/// Host addresses .1 through .254 of the `/24` starting at `base`
pub fn subnet_hosts(base: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = base.octets();
    (1..=254).map(|d| Ipv4Addr::new(a, b, c, d)).collect()
}

/// Stack size of chunk worker threads; they only drive socket connects
const WORKER_STACK_SIZE: usize = 1024 * 1024;

/// Probe settings, copied out of the engine configuration
#[derive(Debug, Clone)]
struct ProbeSettings {
    port: u16,
    probe_timeout: Duration,
    chunk_size: usize,
    chunk_concurrency: usize,
    chunk_timeout: Duration,
    worker_pool: bool,
    fallback_concurrency: usize,
    fallback_timeout: Duration,
    worker_stack_size: usize,
}

/// Finds addresses with the device port open
pub struct NetworkProber {
    settings: ProbeSettings,
}

impl NetworkProber {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            settings: ProbeSettings {
                port: config.device_port,
                probe_timeout: config.probe_timeout(),
                chunk_size: config.chunk_size.max(1),
                chunk_concurrency: config.chunk_concurrency.max(1),
                chunk_timeout: config.chunk_timeout(),
                worker_pool: config.worker_pool,
                fallback_concurrency: config.fallback_concurrency.max(1),
                fallback_timeout: config.fallback_timeout(),
                worker_stack_size: WORKER_STACK_SIZE,
            },
        }
    }

    /// Known-address fast path: probe only the given addresses
    pub async fn probe_addresses(&self, addresses: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
        tracing::debug!("Probing {} known address(es)", addresses.len());

        let mut open = probe_concurrently(
            addresses.to_vec(),
            self.settings.port,
            self.settings.probe_timeout,
            self.settings.fallback_concurrency,
        )
        .await;

        open.sort();
        open.dedup();
        open
    }

    /// Full-subnet path: probe every host of the `/24` at `base`
    pub async fn probe_subnet(&self, base: Ipv4Addr) -> Vec<Ipv4Addr> {
        let hosts = subnet_hosts(base);
        tracing::info!("Scanning {}/24 on port {}", base, self.settings.port);

        let mut open = if self.settings.worker_pool {
            match self.scan_with_workers(&hosts).await {
                Ok(open) => open,
                Err(e) => {
                    tracing::warn!("{}; falling back to single-runtime scan", e);
                    self.scan_fallback(hosts).await
                }
            }
        } else {
            self.scan_fallback(hosts).await
        };

        open.sort();
        open.dedup();
        tracing::info!("Subnet scan found {} open host(s)", open.len());
        open
    }

    /// Run each chunk on a dedicated worker thread
    ///
    /// Fails only when no worker can be started or every worker dies without
    /// reporting; a chunk that merely times out is abandoned and the rest
    /// still count.
    async fn scan_with_workers(&self, hosts: &[Ipv4Addr]) -> Result<Vec<Ipv4Addr>> {
        let settings = &self.settings;
        let mut receivers = Vec::new();

        for (index, chunk) in hosts.chunks(settings.chunk_size).enumerate() {
            let rx = spawn_chunk_worker(index, chunk.to_vec(), settings).map_err(|e| {
                EngineError::WorkerPool(format!(
                    "could not start worker for chunk {}: {}",
                    index, e
                ))
            })?;
            receivers.push(rx);
        }

        let total = receivers.len();
        let chunk_timeout = settings.chunk_timeout;
        let outcomes = join_all(
            receivers
                .into_iter()
                .map(|rx| async move { timeout(chunk_timeout, rx).await }),
        )
        .await;

        let mut open = Vec::new();
        let mut failed = 0;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(Ok(found)) => open.extend(found),
                Ok(Err(_)) => {
                    failed += 1;
                    tracing::warn!("Worker for chunk {} exited without a result", index);
                }
                Err(_) => {
                    tracing::warn!(
                        "Chunk {} exceeded {:?}, abandoning its results",
                        index,
                        chunk_timeout
                    );
                }
            }
        }

        if total > 0 && failed == total {
            return Err(EngineError::WorkerPool(format!("all {} workers failed", total)));
        }

        Ok(open)
    }

    /// Single-runtime scan bounded by a semaphore and an overall wall clock
    ///
    /// Returns whatever resolved before the wall clock ran out.
    pub(crate) async fn scan_fallback(&self, hosts: Vec<Ipv4Addr>) -> Vec<Ipv4Addr> {
        let ProbeSettings {
            port,
            probe_timeout,
            fallback_concurrency,
            fallback_timeout,
            ..
        } = self.settings;

        let semaphore = Arc::new(Semaphore::new(fallback_concurrency));
        let mut tasks = JoinSet::new();
        for ip in hosts {
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                (check_port(ip, port, probe_timeout).await == PortState::Open).then_some(ip)
            });
        }

        let deadline = Instant::now() + fallback_timeout;
        let mut open = Vec::new();
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(Some(ip)))) => open.push(ip),
                Ok(Some(Ok(None))) => {}
                Ok(Some(Err(e))) => tracing::debug!("Probe task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Fallback scan exceeded {:?}, returning {} partial result(s)",
                        fallback_timeout,
                        open.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        open
    }
}

/// Probe `hosts` with at most `concurrency` checks in flight
async fn probe_concurrently(
    hosts: Vec<Ipv4Addr>,
    port: u16,
    probe_timeout: Duration,
    concurrency: usize,
) -> Vec<Ipv4Addr> {
    stream::iter(hosts)
        .map(|ip| async move { (ip, check_port(ip, port, probe_timeout).await) })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|(ip, state)| async move {
            match state {
                PortState::Open => Some(ip),
                PortState::Closed | PortState::TimedOut => None,
            }
        })
        .collect()
        .await
}

/// Start an OS thread that probes one chunk on its own runtime
///
/// Only plain addresses cross the thread boundary. A worker that fails to
/// build its runtime or panics drops the sender, which the caller sees as a
/// receive error.
fn spawn_chunk_worker(
    index: usize,
    chunk: Vec<Ipv4Addr>,
    settings: &ProbeSettings,
) -> std::io::Result<oneshot::Receiver<Vec<Ipv4Addr>>> {
    let (tx, rx) = oneshot::channel();
    let port = settings.port;
    let probe_timeout = settings.probe_timeout;
    let concurrency = settings.chunk_concurrency;

    std::thread::Builder::new()
        .name(format!("probe-chunk-{}", index))
        .stack_size(settings.worker_stack_size)
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!("Chunk {} worker could not build a runtime: {}", index, e);
                    return;
                }
            };

            let open =
                runtime.block_on(probe_concurrently(chunk, port, probe_timeout, concurrency));
            // Receiver is gone if the chunk was abandoned
            let _ = tx.send(open);
        })?;

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpSocket};

    /// A listener with a full accept queue: new connects hang until timed out
    async fn saturated_listener(ip: Ipv4Addr, port: u16) -> (TcpListener, Vec<TcpStream>) {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind((ip, port).into()).unwrap();
        let listener = socket.listen(0).unwrap();

        let mut held = Vec::new();
        for _ in 0..16 {
            match timeout(Duration::from_millis(200), TcpStream::connect((ip, port))).await {
                Ok(Ok(stream)) => held.push(stream),
                _ => break,
            }
        }
        assert_eq!(
            check_port(ip, port, Duration::from_millis(300)).await,
            PortState::TimedOut
        );
        (listener, held)
    }

    fn test_config(port: u16) -> EngineConfig {
        EngineConfig {
            device_port: port,
            probe_timeout_ms: 200,
            chunk_timeout_ms: 5_000,
            fallback_timeout_ms: 5_000,
            discovery_timeout_ms: 10_000,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn subnet_hosts_cover_1_to_254() {
        let hosts = subnet_hosts(Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(hosts[253], Ipv4Addr::new(192, 168, 1, 254));
    }

    #[tokio::test]
    async fn open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ip = Ipv4Addr::LOCALHOST;
        assert_eq!(check_port(ip, port, Duration::from_millis(500)).await, PortState::Open);

        drop(listener);
        assert_ne!(check_port(ip, port, Duration::from_millis(500)).await, PortState::Open);
    }

    #[tokio::test]
    async fn known_addresses_only_probe_the_list() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let prober = NetworkProber::new(&test_config(port));

        let open = prober
            .probe_addresses(&[Ipv4Addr::new(127, 0, 0, 1), Ipv4Addr::new(127, 0, 0, 2)])
            .await;
        assert_eq!(open, vec![Ipv4Addr::new(127, 0, 0, 1)]);
    }

    #[tokio::test]
    async fn worker_and_fallback_scans_agree() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = first.local_addr().unwrap().port();
        let _second = TcpListener::bind(("127.0.0.7", port)).await.unwrap();
        let expected = vec![Ipv4Addr::new(127, 0, 0, 1), Ipv4Addr::new(127, 0, 0, 7)];

        let workers = NetworkProber::new(&test_config(port));
        let open = workers.probe_subnet(Ipv4Addr::new(127, 0, 0, 0)).await;
        assert_eq!(open, expected);

        let fallback = NetworkProber::new(&test_config(port).with_worker_pool(false));
        let open = fallback.probe_subnet(Ipv4Addr::new(127, 0, 0, 0)).await;
        assert_eq!(open, expected);
    }

    #[tokio::test]
    async fn fallback_scan_returns_what_resolved_before_its_wall_clock() {
        let open = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = open.local_addr().unwrap().port();
        let stalled = Ipv4Addr::new(127, 0, 0, 9);
        let (_stalled, _held) = saturated_listener(stalled, port).await;

        let config = EngineConfig {
            device_port: port,
            probe_timeout_ms: 5_000,
            fallback_timeout_ms: 500,
            fallback_concurrency: 4,
            ..EngineConfig::default()
        };
        let prober = NetworkProber::new(&config);

        let started = Instant::now();
        let found = prober.scan_fallback(vec![Ipv4Addr::LOCALHOST, stalled]).await;
        assert_eq!(found, vec![Ipv4Addr::LOCALHOST]);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn timed_out_chunk_is_abandoned() {
        let open = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = open.local_addr().unwrap().port();
        let stalled = Ipv4Addr::new(127, 0, 0, 55);
        let (_stalled, _held) = saturated_listener(stalled, port).await;

        let config = EngineConfig {
            device_port: port,
            probe_timeout_ms: 5_000,
            chunk_size: 10,
            chunk_timeout_ms: 500,
            ..EngineConfig::default()
        };
        let prober = NetworkProber::new(&config);

        let started = Instant::now();
        let found = prober.probe_subnet(Ipv4Addr::new(127, 0, 0, 0)).await;
        assert_eq!(found, vec![Ipv4Addr::LOCALHOST]);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn worker_failure_falls_back_to_single_runtime_scan() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let base = Ipv4Addr::new(127, 0, 0, 0);

        // No thread can be created with a stack this large
        let mut prober = NetworkProber::new(&test_config(port));
        prober.settings.worker_stack_size = usize::MAX / 4;

        let workers = prober.scan_with_workers(&subnet_hosts(base)).await;
        assert!(matches!(workers, Err(EngineError::WorkerPool(_))));

        assert_eq!(prober.probe_subnet(base).await, vec![Ipv4Addr::LOCALHOST]);
    }
}
