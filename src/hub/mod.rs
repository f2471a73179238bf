//! The session relay hub — the in-memory fan-out engine at the core of the
//! server.
//!
//! ## Connection lifecycle
//!
//! 1. A worker opens its websocket; the read loop calls
//!    [`Hub::register_worker`], which records the connection, marks the
//!    worker row online, and auto-resumes any of its offline sessions.
//! 2. A viewer opens a session-scoped websocket; [`Hub::register_viewer`]
//!    replays scrollback and adds the viewer to the session's fan-out set.
//! 3. Worker `output` frames are appended to the session's scrollback and
//!    fanned out to every viewer; viewer input/resize is routed back to the
//!    session's bound worker.
//! 4. When a worker's read loop ends, [`Hub::unregister_worker`] persists
//!    every hosted session as offline so the next registration can resume it.
//!
//! ## Concurrency
//!
//! The `workers` and `sessions` maps sit behind `RwLock`s; readers hold them
//! only long enough to clone an `Arc`, and dispatch happens after release.
//! Socket writes are serialized by per-connection writer tasks fed through
//! mpsc channels. Each relay has its own mutex guarding the viewer set and
//! worker binding; it is held across scrollback-append + fan-out on the
//! output path and across snapshot + insert on the viewer-attach path, which
//! is what guarantees a late viewer sees scrollback first and then every
//! subsequent frame exactly once.
//!
//! Register/unregister for one worker id are serialized by a keyed mutex so
//! that a racing reconnect observes the full offline-persistence sequence
//! before auto-resume runs again.

pub mod protocol;
pub mod scrollback;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::sessions::repository::SessionRepository;
use crate::sessions::SessionStatus;
use crate::workers::repository::WorkerRepository;
use crate::workers::{Worker, WorkerStatus};
use protocol::{ServerMessage, WorkerMessage};
use scrollback::ScrollbackBuffer;

/// Command issued when auto-resuming a session on a reconnected worker.
/// Fixed — fresh sessions carry their own command from creation time.
pub const RESUME_COMMAND: &str = "claude --continue";

/// Outbound channel capacity for each socket writer task.
const OUTBOUND_CAPACITY: usize = 256;

/// A live worker websocket connection. Lives exactly as long as the socket's
/// read loop.
pub struct WorkerConn {
    pub worker_id: Uuid,
    pub user_id: Uuid,
    /// Feeds the worker's writer task; the single consumer serializes all
    /// socket writes for this worker.
    tx: mpsc::Sender<ServerMessage>,
    /// Sessions this worker currently hosts.
    session_ids: Mutex<HashSet<Uuid>>,
}

impl WorkerConn {
    async fn send(&self, msg: ServerMessage) -> bool {
        self.tx.send(msg).await.is_ok()
    }
}

/// Mutable relay state, guarded by the per-relay mutex.
struct RelayState {
    /// Currently bound worker; `None` while the session is offline.
    worker_id: Option<Uuid>,
    /// Fan-out targets, keyed by viewer id.
    viewers: HashMap<Uuid, mpsc::Sender<Bytes>>,
}

/// Per-session relay state: worker binding, scrollback, viewer set.
///
/// A relay may outlive any worker binding — a viewer attached to an offline
/// session keeps the relay (and its scrollback) alive until the session is
/// deleted and [`Hub::evict`] runs.
pub struct SessionRelay {
    pub session_id: Uuid,
    scrollback: ScrollbackBuffer,
    state: Mutex<RelayState>,
}

impl SessionRelay {
    fn new(session_id: Uuid, worker_id: Option<Uuid>, scrollback_size: usize) -> Self {
        Self {
            session_id,
            scrollback: ScrollbackBuffer::new(scrollback_size),
            state: Mutex::new(RelayState {
                worker_id,
                viewers: HashMap::new(),
            }),
        }
    }

    /// Append a chunk to scrollback and forward it to every viewer. The relay
    /// lock is held across both so a concurrent attach cannot lose frames.
    async fn deliver(&self, data: &[u8]) {
        let state = self.state.lock().await;
        self.scrollback.write(data);
        let payload = Bytes::copy_from_slice(data);
        for (viewer_id, tx) in &state.viewers {
            if tx.send(payload.clone()).await.is_err() {
                warn!(
                    session_id = %self.session_id,
                    viewer_id = %viewer_id,
                    "failed to forward output to viewer"
                );
            }
        }
    }
}

/// The in-memory relay core. One instance per process, shared by every
/// handler through `Arc`.
pub struct Hub {
    workers: RwLock<HashMap<Uuid, Arc<WorkerConn>>>,
    sessions: RwLock<HashMap<Uuid, Arc<SessionRelay>>>,
    /// Per-worker-id registration locks; register/unregister sequences for
    /// the same worker must be observed atomically by each other.
    registrations: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    worker_repo: WorkerRepository,
    session_repo: SessionRepository,
    scrollback_size: usize,
}

impl Hub {
    pub fn new(
        worker_repo: WorkerRepository,
        session_repo: SessionRepository,
        scrollback_size: usize,
    ) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            registrations: Mutex::new(HashMap::new()),
            worker_repo,
            session_repo,
            scrollback_size,
        }
    }

    /// Outbound channel for a socket writer task, sized for the hub's use.
    pub fn outbound_channel<T>() -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
        mpsc::channel(OUTBOUND_CAPACITY)
    }

    async fn registration_lock(&self, worker_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.registrations.lock().await;
        Arc::clone(locks.entry(worker_id).or_default())
    }

    async fn worker(&self, worker_id: Uuid) -> Option<Arc<WorkerConn>> {
        self.workers.read().await.get(&worker_id).cloned()
    }

    async fn relay(&self, session_id: Uuid) -> Option<Arc<SessionRelay>> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    /// Fetch the relay for `session_id`, creating it (bound to `worker_id`)
    /// if it does not exist yet. An existing relay's binding is untouched.
    async fn relay_or_create(
        &self,
        session_id: Uuid,
        worker_id: Option<Uuid>,
    ) -> Arc<SessionRelay> {
        if let Some(relay) = self.relay(session_id).await {
            return relay;
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(session_id).or_insert_with(|| {
            Arc::new(SessionRelay::new(session_id, worker_id, self.scrollback_size))
        }))
    }

    // ─── Worker lifecycle ────────────────────────────────────────────────

    /// Register a worker connection and auto-resume its offline sessions.
    ///
    /// `tx` feeds the worker's writer task. The whole sequence (map insert,
    /// row upsert, resumable query, spawns) is atomic with respect to other
    /// register/unregister calls for the same worker id.
    pub async fn register_worker(
        &self,
        worker_id: Uuid,
        user_id: Uuid,
        tx: mpsc::Sender<ServerMessage>,
    ) {
        let lock = self.registration_lock(worker_id).await;
        let _guard = lock.lock().await;

        let conn = Arc::new(WorkerConn {
            worker_id,
            user_id,
            tx,
            session_ids: Mutex::new(HashSet::new()),
        });
        self.workers.write().await.insert(worker_id, conn);
        info!(worker_id = %worker_id, user_id = %user_id, "worker registered");

        // Mark the worker row online, creating it on first registration.
        match self.worker_repo.find_by_id(worker_id).await {
            Ok(Some(mut worker)) => {
                worker.status = WorkerStatus::Online;
                worker.last_seen_at = Utc::now();
                worker.user_id = user_id;
                if let Err(e) = self.worker_repo.update(&worker).await {
                    warn!(worker_id = %worker_id, "failed to mark worker online: {e}");
                }
            }
            Ok(None) => {
                let worker = Worker::new(worker_id, user_id);
                if let Err(e) = self.worker_repo.upsert(&worker).await {
                    warn!(worker_id = %worker_id, "failed to create worker row: {e}");
                }
            }
            Err(e) => {
                warn!(worker_id = %worker_id, "worker lookup failed: {e}");
            }
        }

        // Auto-resume every session this worker left offline.
        let resumable = match self.session_repo.find_resumable(worker_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(worker_id = %worker_id, "failed to query resumable sessions: {e}");
                return;
            }
        };
        for sess in resumable {
            let work_dir = if sess.work_dir.is_empty() {
                "~".to_string()
            } else {
                sess.work_dir.clone()
            };
            info!(session_id = %sess.id, worker_id = %worker_id, "auto-resuming session");
            self.spawn_session(sess.id, worker_id, RESUME_COMMAND, &work_dir)
                .await;
        }
    }

    /// Tear down a worker connection: unbind its relays, persist every hosted
    /// session as offline, then mark the worker row offline. Idempotent —
    /// called from the read loop on any socket error.
    pub async fn unregister_worker(&self, worker_id: Uuid) {
        let lock = self.registration_lock(worker_id).await;
        let _guard = lock.lock().await;

        let Some(conn) = self.workers.write().await.remove(&worker_id) else {
            return;
        };

        let hosted: Vec<Uuid> = conn.session_ids.lock().await.iter().copied().collect();
        for session_id in hosted {
            if let Some(relay) = self.relay(session_id).await {
                relay.state.lock().await.worker_id = None;
            }
            match self.session_repo.find_by_id(session_id).await {
                Ok(Some(mut sess)) => {
                    sess.status = SessionStatus::Offline;
                    if let Err(e) = self.session_repo.update(&sess).await {
                        warn!(session_id = %session_id, "failed to mark session offline: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(session_id = %session_id, "session lookup failed: {e}");
                }
            }
        }

        match self.worker_repo.find_by_id(worker_id).await {
            Ok(Some(mut worker)) => {
                worker.status = WorkerStatus::Offline;
                if let Err(e) = self.worker_repo.update(&worker).await {
                    warn!(worker_id = %worker_id, "failed to mark worker offline: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(worker_id = %worker_id, "worker lookup failed: {e}");
            }
        }

        info!(worker_id = %worker_id, "worker unregistered");
    }

    // ─── Worker messages ─────────────────────────────────────────────────

    /// Dispatch one decoded message from a worker's read loop.
    pub async fn handle_worker_message(&self, worker_id: Uuid, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Pong => {}
            WorkerMessage::Unknown => {
                warn!(worker_id = %worker_id, "dropping message with unknown type");
            }
            WorkerMessage::SessionStarted { session_id } => {
                let Some(session_id) = parse_session_id(&session_id) else {
                    return;
                };
                if let Some(conn) = self.worker(worker_id).await {
                    conn.session_ids.lock().await.insert(session_id);
                }
                match self.session_repo.find_by_id(session_id).await {
                    Ok(Some(mut sess)) => {
                        sess.status = SessionStatus::Running;
                        if let Err(e) = self.session_repo.update(&sess).await {
                            warn!(session_id = %session_id, "failed to mark session running: {e}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(session_id = %session_id, "session lookup failed: {e}");
                    }
                }
                info!(session_id = %session_id, worker_id = %worker_id, "session started");
            }
            WorkerMessage::SessionExited {
                session_id,
                exit_code,
            } => {
                let Some(session_id) = parse_session_id(&session_id) else {
                    return;
                };
                if let Some(conn) = self.worker(worker_id).await {
                    conn.session_ids.lock().await.remove(&session_id);
                }
                match self.session_repo.find_by_id(session_id).await {
                    Ok(Some(mut sess)) => {
                        sess.status = SessionStatus::Stopped;
                        sess.exit_code = exit_code;
                        if let Err(e) = self.session_repo.update(&sess).await {
                            warn!(session_id = %session_id, "failed to mark session stopped: {e}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(session_id = %session_id, "session lookup failed: {e}");
                    }
                }
                info!(
                    session_id = %session_id,
                    exit_code = exit_code.unwrap_or(0),
                    "session exited"
                );
            }
            WorkerMessage::Output { session_id, data } => {
                let Some(session_id) = parse_session_id(&session_id) else {
                    return;
                };
                let Ok(bytes) = BASE64.decode(&data) else {
                    warn!(session_id = %session_id, "invalid base64 output, dropping frame");
                    return;
                };
                let relay = self.relay_or_create(session_id, Some(worker_id)).await;
                relay.deliver(&bytes).await;
            }
        }
    }

    // ─── Session control ─────────────────────────────────────────────────

    /// Send a spawn command to `worker_id` and bind the session's relay to
    /// it. If the worker is not connected the spawn is dropped with a log;
    /// the session row stays `creating` (or `offline` for a resume).
    pub async fn spawn_session(
        &self,
        session_id: Uuid,
        worker_id: Uuid,
        command: &str,
        work_dir: &str,
    ) {
        let Some(conn) = self.worker(worker_id).await else {
            warn!(
                worker_id = %worker_id,
                session_id = %session_id,
                "worker not connected, cannot spawn session"
            );
            return;
        };

        let relay = self.relay_or_create(session_id, Some(worker_id)).await;
        relay.state.lock().await.worker_id = Some(worker_id);

        let sent = conn
            .send(ServerMessage::Spawn {
                session_id: session_id.to_string(),
                command: command.to_string(),
                work_dir: work_dir.to_string(),
            })
            .await;
        if !sent {
            warn!(worker_id = %worker_id, session_id = %session_id, "failed to send spawn");
        }
    }

    /// Forward base64-encoded keystrokes to the session's bound worker.
    /// Silently dropped when the session has no live worker.
    pub async fn send_input(&self, session_id: Uuid, data: String) {
        let Some(conn) = self.bound_conn(session_id).await else {
            return;
        };
        conn.send(ServerMessage::Input {
            session_id: session_id.to_string(),
            data,
        })
        .await;
    }

    /// Forward a terminal resize to the session's bound worker.
    pub async fn send_resize(&self, session_id: Uuid, cols: u16, rows: u16) {
        let Some(conn) = self.bound_conn(session_id).await else {
            return;
        };
        conn.send(ServerMessage::Resize {
            session_id: session_id.to_string(),
            cols,
            rows,
        })
        .await;
    }

    /// Ask the session's bound worker to terminate the PTY.
    pub async fn kill_session(&self, session_id: Uuid) {
        let Some(conn) = self.bound_conn(session_id).await else {
            return;
        };
        conn.send(ServerMessage::Kill {
            session_id: session_id.to_string(),
        })
        .await;
    }

    /// Resolve the session's current worker connection, if any.
    async fn bound_conn(&self, session_id: Uuid) -> Option<Arc<WorkerConn>> {
        let relay = self.relay(session_id).await?;
        let worker_id = relay.state.lock().await.worker_id?;
        self.worker(worker_id).await
    }

    // ─── Viewers ─────────────────────────────────────────────────────────

    /// Attach a viewer to a session. Replays the current scrollback (as one
    /// binary blob) before inserting the viewer into the fan-out set; both
    /// happen under the relay lock, so the viewer sees scrollback-at-attach
    /// followed by every later frame, with no gap and no duplication.
    ///
    /// A relay is created if needed, unbound — attaching to an offline
    /// session for scrollback review is allowed. Returns the viewer id used
    /// for [`Hub::unregister_viewer`].
    pub async fn register_viewer(&self, session_id: Uuid, tx: mpsc::Sender<Bytes>) -> Uuid {
        let relay = self.relay_or_create(session_id, None).await;
        let viewer_id = Uuid::new_v4();

        let mut state = relay.state.lock().await;
        let snapshot = relay.scrollback.snapshot();
        if !snapshot.is_empty() && tx.send(Bytes::from(snapshot)).await.is_err() {
            warn!(session_id = %session_id, viewer_id = %viewer_id, "failed to replay scrollback");
        }
        state.viewers.insert(viewer_id, tx);
        drop(state);

        info!(session_id = %session_id, viewer_id = %viewer_id, "viewer attached");
        viewer_id
    }

    /// Detach a viewer. Idempotent.
    pub async fn unregister_viewer(&self, session_id: Uuid, viewer_id: Uuid) {
        let Some(relay) = self.relay(session_id).await else {
            return;
        };
        if relay.state.lock().await.viewers.remove(&viewer_id).is_some() {
            info!(session_id = %session_id, viewer_id = %viewer_id, "viewer detached");
        }
    }

    /// Drop a session's relay (scrollback included). Called by the
    /// session-delete path after the kill was issued.
    pub async fn evict(&self, session_id: Uuid) {
        if self.sessions.write().await.remove(&session_id).is_some() {
            info!(session_id = %session_id, "relay evicted");
        }
    }

    // ─── Ping loop ───────────────────────────────────────────────────────

    /// Start the background liveness ticker. Pings are fire-and-forget: a
    /// failed write is logged, and the worker's own read loop is what drives
    /// unregistration. The returned handle lets `main` stop the loop on
    /// shutdown.
    pub fn start_ping_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let conns: Vec<Arc<WorkerConn>> =
                    hub.workers.read().await.values().cloned().collect();
                for conn in conns {
                    if conn.tx.try_send(ServerMessage::Ping).is_err() {
                        warn!(worker_id = %conn.worker_id, "failed to ping worker");
                    }
                }
            }
        })
    }

    // ─── Introspection ───────────────────────────────────────────────────

    /// Whether a worker socket is currently registered.
    pub async fn is_worker_connected(&self, worker_id: Uuid) -> bool {
        self.workers.read().await.contains_key(&worker_id)
    }

    /// Number of registered worker connections.
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Session ids currently hosted by a worker, or empty if not connected.
    pub async fn hosted_sessions(&self, worker_id: Uuid) -> Vec<Uuid> {
        match self.worker(worker_id).await {
            Some(conn) => conn.session_ids.lock().await.iter().copied().collect(),
            None => Vec::new(),
        }
    }

    /// The worker a session's relay is currently bound to.
    pub async fn bound_worker(&self, session_id: Uuid) -> Option<Uuid> {
        let relay = self.relay(session_id).await?;
        let state = relay.state.lock().await;
        state.worker_id
    }

    /// Number of viewers attached to a session.
    pub async fn viewer_count(&self, session_id: Uuid) -> usize {
        match self.relay(session_id).await {
            Some(relay) => relay.state.lock().await.viewers.len(),
            None => 0,
        }
    }

    /// Copy of a session's scrollback, if a relay exists.
    pub async fn scrollback_snapshot(&self, session_id: Uuid) -> Option<Vec<u8>> {
        let relay = self.relay(session_id).await?;
        Some(relay.scrollback.snapshot())
    }
}

fn parse_session_id(raw: &str) -> Option<Uuid> {
    match Uuid::parse_str(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(session_id = raw, "invalid session id in worker message");
            None
        }
    }
}
