//! The event-loop Context.
//!
//! One [`Context`] exists per event loop: a single one for the daemon, and one
//! per outbound connection for the client.  It owns:
//!
//! - the **running flag** (true → false exactly once) and a stop signal,
//! - the **connection table** mapping each live connection to its session,
//! - the **hooks** that start and stop the work on top of each session,
//! - the **keepalive policy** applied by the periodic health sweep,
//! - a handle to the Tokio runtime that drives the loop, while it runs.
//!
//! `Context` is a cheap `Arc` handle; clone it into every task that needs it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use usbws_core::{DiscontinueReason, HealthAction, HealthMonitor, PeerAddr, Session};

use super::hooks::{Connection, ConnectionId, SessionHooks};

/// How often the health sweep visits every session.
pub const HEALTH_SWEEP: Duration = Duration::from_secs(1);

struct Inner {
    running: AtomicBool,
    stop: Notify,
    health: HealthMonitor,
    hooks: Arc<dyn SessionHooks>,
    connections: Mutex<HashMap<ConnectionId, Arc<Session>>>,
    next_id: AtomicU64,
    runtime: Mutex<Option<Handle>>,
}

/// Shared handle to one event loop's state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Context {
    pub fn new(health: HealthMonitor, hooks: Arc<dyn SessionHooks>) -> Self {
        Self {
            inner: Arc::new(Inner {
                running: AtomicBool::new(true),
                stop: Notify::new(),
                health,
                hooks,
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                runtime: Mutex::new(None),
            }),
        }
    }

    // ── Running flag ──────────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Clears the running flag and wakes everything waiting in
    /// [`Context::stopped`].  Only the first call has an effect.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("context stopped");
            self.inner.stop.notify_waiters();
        }
    }

    /// Handles a process interrupt: every session is discontinued, then the
    /// loop is stopped.
    pub fn interrupt(&self) {
        info!("interrupted; breaking all connections");
        self.discontinue_all(DiscontinueReason::Interrupted);
        self.stop();
    }

    /// Resolves once [`Context::stop`] has been called.
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.stop.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    // ── Runtime handle ────────────────────────────────────────────────────────

    /// Records the runtime driving this Context.
    pub fn attach_runtime(&self, handle: Handle) {
        *lock(&self.inner.runtime) = Some(handle);
    }

    /// Forgets the runtime handle once the loop has exited.
    pub fn detach_runtime(&self) {
        lock(&self.inner.runtime).take();
    }

    pub fn runtime(&self) -> Option<Handle> {
        lock(&self.inner.runtime).clone()
    }

    // ── Connection table ──────────────────────────────────────────────────────

    /// Creates a session for a freshly established connection and records it.
    pub fn register(&self, peer: PeerAddr) -> Arc<Session> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, peer));
        lock(&self.inner.connections).insert(id, Arc::clone(&session));
        debug!(connection = id, "registered");
        session
    }

    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Session>> {
        let removed = lock(&self.inner.connections).remove(&id);
        if removed.is_some() {
            debug!(connection = id, "unregistered");
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.inner.connections).len()
    }

    /// Snapshot of every live session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        lock(&self.inner.connections).values().cloned().collect()
    }

    pub fn discontinue_all(&self, reason: DiscontinueReason) {
        for session in self.sessions() {
            session.discontinue(reason);
        }
    }

    // ── Hooks ─────────────────────────────────────────────────────────────────

    pub fn start_session(&self, conn: &Connection) -> anyhow::Result<()> {
        debug!(connection = conn.id, peer = %conn.peer, "starting session");
        self.inner.hooks.on_session_start(self, conn)
    }

    pub fn stop_session(&self, conn: &Connection) {
        debug!(connection = conn.id, peer = %conn.peer, "stopping session");
        if let Err(e) = self.inner.hooks.on_session_stop(self, conn) {
            warn!(connection = conn.id, "session stop hook failed: {e:#}");
        }
    }

    // ── Health sweep ──────────────────────────────────────────────────────────

    /// Applies the keepalive policy to every session once.  Sessions that need
    /// a ping or a close have their event loop woken.  Returns how many
    /// sessions are to be closed.
    pub fn sweep(&self, now: Instant) -> usize {
        let health = self.inner.health;
        let mut closing = 0;
        for session in self.sessions() {
            match health.check(&session, now) {
                HealthAction::None | HealthAction::Ping => {}
                HealthAction::Close => {
                    session.loop_wake().notify_one();
                    closing += 1;
                }
            }
        }
        closing
    }

    /// Runs [`Context::sweep`] every [`HEALTH_SWEEP`] until the Context stops.
    pub async fn run_health_monitor(self) {
        let mut ticker = tokio::time::interval(HEALTH_SWEEP);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(Instant::now());
                }
                _ = self.stopped() => break,
            }
        }
        debug!("health monitor finished");
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("running", &self.is_running())
            .field("connections", &self.connection_count())
            .field("health", &self.inner.health)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
