//! Upstream tunnel lifecycle management
//!
//! The tunnel is an external relay (typically `ssh -N -D`) exposing a
//! local SOCKS5 entry point. This module owns its lifecycle: spawning
//! the relay process, waiting for the entry port to accept, health
//! probing while it runs, and restarting with bounded backoff when it
//! fails.
//!
//! # State Machine
//!
//! ```text
//!             start()
//!   Stopped ─────────> Starting ─── entry ready ──> Running
//!      ^                │    ^                         │
//!      │    timeout /   │    │ backoff,                │ probe failures
//!      │    spawn fail  v    │ retry                   v or relay exit
//!      └── stop() ──── Failed <────────────────────────┘
//! ```
//!
//! `stop()` reaches Stopped from any state. `Stopped -> Running`
//! without passing through Starting is impossible.
//!
//! # Hysteresis
//!
//! A single failed probe does not take the tunnel down. The supervisor
//! requires `failure_threshold` consecutive failures before declaring
//! Failed; any successful probe resets the counter. Restart delays
//! double per consecutive failure cycle up to `backoff_cap`, and reset
//! once Running is reached again.

use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::TunnelError;
use crate::outbound::Socks5Outbound;

/// Default consecutive probe failures before the tunnel is Failed
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// How often the Starting phase re-probes the entry port
const ENTRY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long `stop()` waits for the supervisor before aborting it
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Tunnel lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    /// Not started, or stopped by request
    Stopped,
    /// Relay spawned, waiting for the entry port to accept
    Starting,
    /// Entry port accepting, health probes passing
    Running,
    /// Startup or health checking failed; retry pending
    Failed,
}

impl TunnelStatus {
    /// String form matching the serialized representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owned snapshot of the tunnel state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelState {
    /// Current lifecycle state
    pub status: TunnelStatus,
    /// Local SOCKS5 entry point
    pub local_addr: SocketAddr,
    /// Unix timestamp of the last transition into Running
    pub started_at: Option<u64>,
    /// Most recent failure, cleared when Running is reached
    pub last_error: Option<String>,
}

impl TunnelState {
    /// Seconds since the tunnel last reached Running
    #[must_use]
    pub fn uptime_secs(&self) -> Option<u64> {
        self.started_at.map(|t| unix_now().saturating_sub(t))
    }
}

/// Tunnel supervisor configuration
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Local SOCKS5 entry point the relay exposes
    pub local_addr: SocketAddr,
    /// Relay command argv (e.g. `["ssh", "-N", "-D", "1080", "user@host"]`).
    /// `None` when an externally managed relay is probed instead.
    pub relay_command: Option<Vec<String>>,
    /// Username for the entry point, when it requires authentication
    pub username: Option<String>,
    /// Password for the entry point
    pub password: Option<String>,
    /// Timeout for individual entry probes
    pub connect_timeout: Duration,
    /// Interval between health probes while Running
    pub health_interval: Duration,
    /// Consecutive probe failures before Failed
    pub failure_threshold: u32,
    /// Initial restart delay after a failure
    pub backoff_base: Duration,
    /// Upper bound on the restart delay
    pub backoff_cap: Duration,
    /// How long Starting waits for the entry port to accept
    pub start_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            local_addr: "127.0.0.1:1080".parse().unwrap_or_else(|_| {
                SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 1080)
            }),
            relay_command: None,
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            start_timeout: Duration::from_secs(15),
        }
    }
}

/// State shared between the manager handle and the supervisor task
struct TunnelShared {
    state: RwLock<TunnelState>,
}

impl TunnelShared {
    fn new(local_addr: SocketAddr) -> Self {
        Self {
            state: RwLock::new(TunnelState {
                status: TunnelStatus::Stopped,
                local_addr,
                started_at: None,
                last_error: None,
            }),
        }
    }

    /// Apply a lifecycle transition, rejecting moves the state machine
    /// does not allow. Returns whether the transition was applied.
    fn transition(&self, next: TunnelStatus) -> bool {
        let mut state = self.state.write();
        let current = state.status;

        let allowed = matches!(
            (current, next),
            (TunnelStatus::Stopped | TunnelStatus::Failed, TunnelStatus::Starting)
                | (TunnelStatus::Starting, TunnelStatus::Running | TunnelStatus::Failed)
                | (TunnelStatus::Running, TunnelStatus::Failed)
                | (_, TunnelStatus::Stopped)
        );

        if !allowed {
            warn!(from = %current, to = %next, "rejected tunnel state transition");
            return false;
        }

        debug!(from = %current, to = %next, "tunnel state transition");
        state.status = next;
        match next {
            TunnelStatus::Running => {
                state.started_at = Some(unix_now());
                state.last_error = None;
            }
            TunnelStatus::Stopped => {
                state.started_at = None;
            }
            _ => {}
        }
        true
    }

    /// Transition to Failed and record the reason
    fn fail(&self, reason: &str) {
        error!(reason = %reason, "tunnel failed");
        if self.transition(TunnelStatus::Failed) {
            self.state.write().last_error = Some(reason.to_string());
        }
    }

    fn status(&self) -> TunnelStatus {
        self.state.read().status
    }

    fn snapshot(&self) -> TunnelState {
        self.state.read().clone()
    }
}

/// Handle to a running supervisor task
struct SupervisorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Manages the upstream tunnel lifecycle
///
/// Cheap to share behind an [`Arc`]; `start()`/`stop()` serialize on an
/// internal lock while status reads are lock-free of it.
pub struct UpstreamTunnelManager {
    config: TunnelConfig,
    shared: Arc<TunnelShared>,
    supervisor: Mutex<Option<SupervisorHandle>>,
}

impl UpstreamTunnelManager {
    /// Create a manager in the Stopped state
    #[must_use]
    pub fn new(config: TunnelConfig) -> Self {
        let shared = Arc::new(TunnelShared::new(config.local_addr));
        Self {
            config,
            shared,
            supervisor: Mutex::new(None),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn status(&self) -> TunnelStatus {
        self.shared.status()
    }

    /// Owned snapshot of the full state
    #[must_use]
    pub fn state(&self) -> TunnelState {
        self.shared.snapshot()
    }

    /// Whether proxied connections can be carried right now
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status() == TunnelStatus::Running
    }

    /// The local SOCKS5 entry point
    #[must_use]
    pub const fn local_entry(&self) -> SocketAddr {
        self.config.local_addr
    }

    /// Build a SOCKS5 client for the entry point, carrying the
    /// configured credentials
    #[must_use]
    pub fn outbound(&self) -> Socks5Outbound {
        let mut outbound = Socks5Outbound::new(self.config.local_addr);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            outbound = outbound.with_auth(user.clone(), pass.clone());
        }
        outbound
    }

    /// Start the supervisor
    ///
    /// Idempotent: a no-op while the tunnel is Starting or Running.
    /// Called while Failed, it cuts the pending backoff short and
    /// retries immediately.
    pub async fn start(&self) {
        let mut guard = self.supervisor.lock().await;

        if let Some(handle) = guard.take() {
            if !handle.task.is_finished()
                && matches!(
                    self.shared.status(),
                    TunnelStatus::Starting | TunnelStatus::Running
                )
            {
                debug!(status = %self.shared.status(), "tunnel already active, start ignored");
                *guard = Some(handle);
                return;
            }
            // Failed in backoff, or a finished task: replace it
            let _ = handle.shutdown_tx.send(true);
            let _ = handle.task.await;
        }

        if !self.shared.transition(TunnelStatus::Starting) {
            return;
        }

        info!(entry = %self.config.local_addr, "starting tunnel supervisor");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let task = tokio::spawn(supervise(config, shared, shutdown_rx));

        *guard = Some(SupervisorHandle { shutdown_tx, task });
    }

    /// Stop the supervisor and the relay process
    ///
    /// Transitions to Stopped from any state. Returns
    /// [`TunnelError::StopTimeout`] when the supervisor had to be
    /// aborted instead of shutting down cleanly.
    pub async fn stop(&self) -> Result<(), TunnelError> {
        let mut guard = self.supervisor.lock().await;

        let mut timed_out = false;
        if let Some(handle) = guard.take() {
            let _ = handle.shutdown_tx.send(true);
            let abort = handle.task.abort_handle();
            match timeout(STOP_GRACE, handle.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "tunnel supervisor task panicked"),
                Err(_) => {
                    warn!("tunnel supervisor did not stop in time, aborting");
                    abort.abort();
                    timed_out = true;
                }
            }
        }

        self.shared.transition(TunnelStatus::Stopped);
        info!("tunnel stopped");

        if timed_out {
            Err(TunnelError::StopTimeout)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for UpstreamTunnelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamTunnelManager")
            .field("entry", &self.config.local_addr)
            .field("status", &self.status())
            .finish()
    }
}

// ==================== Supervisor ====================

enum PhaseOutcome {
    Failed(String),
    Shutdown,
}

/// Supervisor loop: spawn, wait for the entry, probe, retry on failure
async fn supervise(
    config: TunnelConfig,
    shared: Arc<TunnelShared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = config.backoff_base;

    loop {
        // Starting: optionally spawn the relay, then wait for the entry
        let mut child = match spawn_relay(&config) {
            Ok(child) => child,
            Err(e) => {
                shared.fail(&e.to_string());
                if !backoff_sleep(&mut backoff, config.backoff_cap, &mut shutdown_rx).await {
                    return;
                }
                shared.transition(TunnelStatus::Starting);
                continue;
            }
        };

        match wait_for_entry(&config, &mut child, &mut shutdown_rx).await {
            Ok(()) => {}
            Err(PhaseOutcome::Shutdown) => {
                kill_relay(&mut child).await;
                return;
            }
            Err(PhaseOutcome::Failed(reason)) => {
                shared.fail(&reason);
                kill_relay(&mut child).await;
                if !backoff_sleep(&mut backoff, config.backoff_cap, &mut shutdown_rx).await {
                    return;
                }
                shared.transition(TunnelStatus::Starting);
                continue;
            }
        }

        shared.transition(TunnelStatus::Running);
        backoff = config.backoff_base;
        info!(entry = %config.local_addr, "tunnel running");

        // Running: health probes with hysteresis
        let outcome = health_loop(&config, &mut child, &mut shutdown_rx).await;
        kill_relay(&mut child).await;

        match outcome {
            PhaseOutcome::Shutdown => return,
            PhaseOutcome::Failed(reason) => {
                shared.fail(&reason);
                if !backoff_sleep(&mut backoff, config.backoff_cap, &mut shutdown_rx).await {
                    return;
                }
                shared.transition(TunnelStatus::Starting);
            }
        }
    }
}

/// Spawn the relay child, when one is configured
fn spawn_relay(config: &TunnelConfig) -> Result<Option<Child>, TunnelError> {
    let Some(argv) = &config.relay_command else {
        return Ok(None);
    };
    let Some((program, args)) = argv.split_first() else {
        return Err(TunnelError::spawn_failed("", "relay command is empty"));
    };

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TunnelError::spawn_failed(argv.join(" "), e.to_string()))?;

    info!(command = %argv.join(" "), pid = ?child.id(), "relay process spawned");
    Ok(Some(child))
}

/// Kill the relay child and reap it
async fn kill_relay(child: &mut Option<Child>) {
    if let Some(mut c) = child.take() {
        if let Err(e) = c.kill().await {
            debug!(error = %e, "relay kill failed");
        }
    }
}

/// Resolves when the relay child exits; pending forever without one
async fn relay_exited(child: &mut Option<Child>) -> String {
    match child {
        Some(c) => match c.wait().await {
            Ok(status) => format!("relay process exited: {status}"),
            Err(e) => format!("relay process wait failed: {e}"),
        },
        None => std::future::pending().await,
    }
}

/// Single connect probe against the entry port
async fn probe_entry(addr: SocketAddr, probe_timeout: Duration) -> bool {
    matches!(
        timeout(probe_timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Poll the entry port until it accepts or `start_timeout` elapses
async fn wait_for_entry(
    config: &TunnelConfig,
    child: &mut Option<Child>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<(), PhaseOutcome> {
    let deadline = Instant::now() + config.start_timeout;

    loop {
        if probe_entry(config.local_addr, config.connect_timeout).await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            let err = TunnelError::EntryNotReady {
                addr: config.local_addr.to_string(),
                waited_secs: config.start_timeout.as_secs(),
            };
            return Err(PhaseOutcome::Failed(err.to_string()));
        }

        tokio::select! {
            _ = sleep(ENTRY_POLL_INTERVAL) => {}
            reason = relay_exited(child) => {
                let err = TunnelError::RelayExited { reason };
                return Err(PhaseOutcome::Failed(err.to_string()));
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Err(PhaseOutcome::Shutdown);
                }
            }
        }
    }
}

/// Probe the entry every `health_interval` while watching the child
async fn health_loop(
    config: &TunnelConfig,
    child: &mut Option<Child>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> PhaseOutcome {
    let mut failures: u32 = 0;
    let mut ticker = interval(config.health_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The entry was probed moments ago; schedule the first tick a full
    // interval out
    ticker.reset();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if probe_entry(config.local_addr, config.connect_timeout).await {
                    if failures > 0 {
                        debug!(failures, "tunnel probe recovered");
                    }
                    failures = 0;
                } else {
                    failures += 1;
                    warn!(
                        failures,
                        threshold = config.failure_threshold,
                        "tunnel health probe failed"
                    );
                    if failures >= config.failure_threshold {
                        return PhaseOutcome::Failed(format!(
                            "{failures} consecutive health probes failed"
                        ));
                    }
                }
            }
            reason = relay_exited(child) => {
                let err = TunnelError::RelayExited { reason };
                return PhaseOutcome::Failed(err.to_string());
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return PhaseOutcome::Shutdown;
                }
            }
        }
    }
}

/// Sleep the current backoff, doubling it toward the cap.
/// Returns `false` when shutdown was signaled during the sleep.
async fn backoff_sleep(
    backoff: &mut Duration,
    cap: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    let delay = *backoff;
    debug!(delay_ms = delay.as_millis() as u64, "tunnel restart backoff");
    *backoff = (*backoff * 2).min(cap);

    tokio::select! {
        _ = sleep(delay) => true,
        changed = shutdown_rx.changed() => {
            !(changed.is_err() || *shutdown_rx.borrow())
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
