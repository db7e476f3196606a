//! A single running proxy: listener, accept loop, and per-connection relays.
//!
//! Lifecycle: `Created` (bound, not accepting) -> `Running` (accept loop
//! active) -> `Stopping` (stop signal set) -> `Stopped` (accept loop exited,
//! listener released).

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nettools_capture::{BufferStats, CaptureBuffer, CapturedPacket, Direction};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use super::relay::{copy_with_capture, CaptureSink, RelaySignals};
use super::signal::StopSignal;
use crate::error::ProxyError;

/// Default timeout for dialing the forward target.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `shutdown` waits for the accept loop before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Pause after a failed accept to avoid a hot loop on persistent errors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Lifecycle state of a proxy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProxyState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl ProxyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProxyState::Created,
            1 => ProxyState::Running,
            2 => ProxyState::Stopping,
            _ => ProxyState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyState::Created => "created",
            ProxyState::Running => "running",
            ProxyState::Stopping => "stopping",
            ProxyState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative counters for an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// Bytes seen by the relay in both directions.
    pub bytes_captured: u64,
    /// Connections accepted over the instance lifetime.
    pub connections: u64,
}

/// Consistent view of an instance for listing.
#[derive(Debug, Clone)]
pub struct ProxySummary {
    pub listen_port: u16,
    pub forward_to: String,
    pub state: ProxyState,
    pub active_connections: u64,
    pub total_connections: u64,
    pub bytes_captured: u64,
    pub buffer: BufferStats,
    pub started_at: DateTime<Utc>,
}

/// Configuration for binding one instance.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub bind_ip: IpAddr,
    pub listen_port: u16,
    pub forward_host: String,
    pub forward_port: u16,
    /// Capture budget in bytes; 0 selects the default.
    pub capture_limit: usize,
    pub dial_timeout: Duration,
}

/// `host:port`, bracketing IPv6 literals.
pub fn format_target(host: &str, port: u16) -> String {
    if host.parse::<std::net::Ipv6Addr>().is_ok() {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// State shared by the accept loop and every connection task.
#[derive(Debug)]
struct Shared {
    listen_port: u16,
    target: String,
    dial_timeout: Duration,
    buffer: CaptureBuffer,
    stats: Mutex<ProxyStats>,
    active: AtomicU64,
    state: AtomicU8,
    stop: StopSignal,
}

impl Shared {
    fn stats(&self) -> MutexGuard<'_, ProxyStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ProxyState {
        ProxyState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ProxyState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move forward to `state`, never backwards.
    fn advance_state(&self, state: ProxyState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }
}

impl CaptureSink for Shared {
    fn capture(&self, direction: Direction, data: &[u8]) {
        self.stats().bytes_captured += data.len() as u64;
        self.buffer.add(CapturedPacket::from_chunk(direction, data));
    }
}

/// Decrements the active-connection counter when the handler exits.
struct ActiveConnection(Arc<Shared>);

impl ActiveConnection {
    fn register(shared: &Arc<Shared>) -> Self {
        shared.active.fetch_add(1, Ordering::Relaxed);
        shared.stats().connections += 1;
        Self(Arc::clone(shared))
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A proxy bound to one listen port with one forward target.
#[derive(Debug)]
pub struct ProxyInstance {
    forward_host: String,
    forward_port: u16,
    local_addr: SocketAddr,
    started_at: DateTime<Utc>,
    shared: Arc<Shared>,
    listener: Mutex<Option<TcpListener>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyInstance {
    /// Bind the listen socket. The instance is `Created` and not yet accepting.
    pub async fn bind(config: InstanceConfig) -> Result<Self, ProxyError> {
        let bind_addr = SocketAddr::new(config.bind_ip, config.listen_port);
        let bind_error = |source: io::Error| ProxyError::Bind {
            port: config.listen_port,
            source,
        };

        let listener = TcpListener::bind(bind_addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        debug!(
            bind_addr = %local_addr,
            capture_limit = config.capture_limit,
            "Listener bound"
        );

        let shared = Arc::new(Shared {
            listen_port: local_addr.port(),
            target: format_target(&config.forward_host, config.forward_port),
            dial_timeout: config.dial_timeout,
            buffer: CaptureBuffer::new(config.capture_limit),
            stats: Mutex::new(ProxyStats::default()),
            active: AtomicU64::new(0),
            state: AtomicU8::new(ProxyState::Created as u8),
            stop: StopSignal::new(),
        });

        Ok(Self {
            forward_host: config.forward_host,
            forward_port: config.forward_port,
            local_addr,
            started_at: Utc::now(),
            shared,
            listener: Mutex::new(Some(listener)),
            task: Mutex::new(None),
        })
    }

    /// Spawn the accept loop. Calling this more than once has no effect.
    pub fn start(&self) {
        let Some(listener) = lock(&self.listener).take() else {
            return;
        };
        if self.shared.stop.is_triggered() {
            return;
        }

        self.shared.set_state(ProxyState::Running);
        let shared = Arc::clone(&self.shared);
        let span = tracing::info_span!("proxy", listen_port = self.shared.listen_port);
        let handle = tokio::spawn(accept_loop(listener, shared).instrument(span));
        *lock(&self.task) = Some(handle);
    }

    /// Signal the stop, release the listener, and wait for the accept loop.
    pub async fn shutdown(&self) {
        if self.shared.stop.trigger() {
            info!(listen_port = self.shared.listen_port, "Stopping proxy");
        }
        self.shared.advance_state(ProxyState::Stopping);

        // Never started: nothing is accepting, just release the socket.
        drop(lock(&self.listener).take());

        let handle = lock(&self.task).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!(
                    listen_port = self.shared.listen_port,
                    "Accept loop did not stop in time, aborting"
                );
                handle.abort();
            }
        }

        self.shared.set_state(ProxyState::Stopped);
    }

    pub fn listen_port(&self) -> u16 {
        self.shared.listen_port
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn forward_host(&self) -> &str {
        &self.forward_host
    }

    pub fn forward_port(&self) -> u16 {
        self.forward_port
    }

    /// Forward target as `host:port`.
    pub fn forward_to(&self) -> &str {
        &self.shared.target
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> ProxyState {
        self.shared.state()
    }

    pub fn active_connections(&self) -> u64 {
        self.shared.active.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ProxyStats {
        *self.shared.stats()
    }

    pub fn buffer(&self) -> &CaptureBuffer {
        &self.shared.buffer
    }

    pub fn summary(&self) -> ProxySummary {
        let stats = self.stats();
        ProxySummary {
            listen_port: self.listen_port(),
            forward_to: self.forward_to().to_string(),
            state: self.state(),
            active_connections: self.active_connections(),
            total_connections: stats.connections,
            bytes_captured: stats.bytes_captured,
            buffer: self.shared.buffer.stats(),
            started_at: self.started_at,
        }
    }
}

impl Drop for ProxyInstance {
    fn drop(&mut self) {
        // Connection tasks hold `Shared`; make sure they unwind.
        self.shared.stop.trigger();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    info!(
        bind_addr = ?listener.local_addr().ok(),
        forward_to = %shared.target,
        "Proxy listening"
    );

    loop {
        if shared.stop.is_triggered() {
            break;
        }

        let accepted = tokio::select! {
            biased;
            _ = shared.stop.triggered() => break,
            result = listener.accept() => result,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                let active = ActiveConnection::register(&shared);
                let shared = Arc::clone(&shared);

                tokio::spawn(
                    async move {
                        if let Err(e) = handle_connection(&shared, stream, peer_addr).await {
                            warn!(
                                reason = e.reason_code(),
                                error = %e,
                                "Connection failed"
                            );
                        }
                        drop(active);
                    }
                    .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                );
            }
            Err(e) => {
                warn!(error = %e, "Accept error");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }

    shared.advance_state(ProxyState::Stopping);
    drop(listener);
    info!("Accept loop stopped");
}

/// Dial upstream and relay both directions until either side ends.
async fn handle_connection(
    shared: &Shared,
    mut client: TcpStream,
    peer_addr: SocketAddr,
) -> Result<(), ProxyError> {
    let dialed = tokio::select! {
        biased;
        _ = shared.stop.triggered() => return Ok(()),
        result = tokio::time::timeout(
            shared.dial_timeout,
            TcpStream::connect(shared.target.as_str()),
        ) => result,
    };

    let dial_error = |source: io::Error| ProxyError::UpstreamDial {
        target: shared.target.clone(),
        source,
    };
    let mut upstream = match dialed {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(dial_error(e)),
        Err(_) => {
            return Err(dial_error(io::Error::new(
                io::ErrorKind::TimedOut,
                "dial timed out",
            )))
        }
    };

    info!(peer_addr = %peer_addr, forward_to = %shared.target, "New connection");

    let pair = StopSignal::new();
    let signals = RelaySignals {
        instance: &shared.stop,
        pair: &pair,
    };

    let (mut client_read, mut client_write) = client.split();
    let (mut upstream_read, mut upstream_write) = upstream.split();

    let (bytes_to_server, bytes_to_client) = tokio::join!(
        copy_with_capture(
            &mut client_read,
            &mut upstream_write,
            Direction::ClientToServer,
            shared,
            signals,
        ),
        copy_with_capture(
            &mut upstream_read,
            &mut client_write,
            Direction::ServerToClient,
            shared,
            signals,
        ),
    );

    info!(
        peer_addr = %peer_addr,
        bytes_to_server,
        bytes_to_client,
        "Connection closed"
    );

    Ok(())
}
