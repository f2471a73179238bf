//! End-to-end tests for the relay hub: worker registration and auto-resume,
//! scrollback replay, viewer fan-out, and control-message routing. Sockets
//! are stood in for by the same mpsc channels the websocket handlers use.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc;
use uuid::Uuid;

use termhub::db;
use termhub::hub::protocol::{ServerMessage, WorkerMessage};
use termhub::hub::{Hub, RESUME_COMMAND};
use termhub::sessions::repository::SessionRepository;
use termhub::sessions::{Session, SessionStatus, SessionType};
use termhub::workers::repository::WorkerRepository;
use termhub::workers::WorkerStatus;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

async fn setup(scrollback_size: usize) -> (Arc<Hub>, WorkerRepository, SessionRepository) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    db::migrate(&pool).await.expect("migrations");

    let worker_repo = WorkerRepository::new(pool.clone());
    let session_repo = SessionRepository::new(pool);
    let hub = Arc::new(Hub::new(
        worker_repo.clone(),
        session_repo.clone(),
        scrollback_size,
    ));
    (hub, worker_repo, session_repo)
}

async fn connect_worker(hub: &Hub, worker_id: Uuid, user_id: Uuid) -> mpsc::Receiver<ServerMessage> {
    let (tx, rx) = Hub::outbound_channel();
    hub.register_worker(worker_id, user_id, tx).await;
    rx
}

async fn attach_viewer(hub: &Hub, session_id: Uuid) -> (Uuid, mpsc::Receiver<Bytes>) {
    let (tx, rx) = Hub::outbound_channel();
    let viewer_id = hub.register_viewer(session_id, tx).await;
    (viewer_id, rx)
}

fn output(session_id: Uuid, data: &[u8]) -> WorkerMessage {
    WorkerMessage::Output {
        session_id: session_id.to_string(),
        data: BASE64.encode(data),
    }
}

fn started(session_id: Uuid) -> WorkerMessage {
    WorkerMessage::SessionStarted {
        session_id: session_id.to_string(),
    }
}

fn make_session(user_id: Uuid, worker_id: Option<Uuid>, status: SessionStatus) -> Session {
    let now = Utc::now();
    Session {
        id: Uuid::new_v4(),
        user_id,
        name: "New Session".to_string(),
        session_type: SessionType::Worker,
        worker_id,
        work_dir: "~".to_string(),
        command: "claude".to_string(),
        exit_code: None,
        status,
        created_at: now,
        updated_at: now,
    }
}

async fn recv_frame(rx: &mut mpsc::Receiver<Bytes>) -> Bytes {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel closed")
}

async fn recv_msg(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

// ─── Fan-out and scrollback ─────────────────────────────────────────────────

#[tokio::test]
async fn fan_out_delivers_every_frame_in_order_to_all_viewers() {
    let (hub, _, _) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();
    let session_id = Uuid::new_v4();
    let _wrx = connect_worker(&hub, worker_id, user_id).await;

    let mut viewers = Vec::new();
    for _ in 0..3 {
        let (_, rx) = attach_viewer(&hub, session_id).await;
        viewers.push(rx);
    }

    let frames: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i, i + 1, i + 2]).collect();
    for frame in &frames {
        hub.handle_worker_message(worker_id, output(session_id, frame))
            .await;
    }

    for rx in &mut viewers {
        for frame in &frames {
            assert_eq!(recv_frame(rx).await.as_ref(), frame.as_slice());
        }
        assert!(rx.try_recv().is_err(), "no extra frames expected");
    }
}

#[tokio::test]
async fn late_viewer_gets_scrollback_blob_then_live_frames() {
    let (hub, _, _) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();
    let session_id = Uuid::new_v4();
    let _wrx = connect_worker(&hub, worker_id, user_id).await;

    // First viewer attaches before any output: no blob.
    let (_, mut v1) = attach_viewer(&hub, session_id).await;

    hub.handle_worker_message(worker_id, output(session_id, b"hello"))
        .await;
    assert_eq!(recv_frame(&mut v1).await.as_ref(), b"hello");

    // Second viewer attaches late: one blob with everything so far.
    let (_, mut v2) = attach_viewer(&hub, session_id).await;
    assert_eq!(recv_frame(&mut v2).await.as_ref(), b"hello");

    hub.handle_worker_message(worker_id, output(session_id, b"world"))
        .await;
    assert_eq!(recv_frame(&mut v1).await.as_ref(), b"world");
    assert_eq!(recv_frame(&mut v2).await.as_ref(), b"world");

    assert_eq!(
        hub.scrollback_snapshot(session_id).await.unwrap(),
        b"helloworld"
    );
}

#[tokio::test]
async fn scrollback_is_capped_at_configured_size() {
    let (hub, _, _) = setup(8).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();
    let session_id = Uuid::new_v4();
    let _wrx = connect_worker(&hub, worker_id, user_id).await;

    hub.handle_worker_message(worker_id, output(session_id, b"abcdefgh"))
        .await;
    hub.handle_worker_message(worker_id, output(session_id, b"1234"))
        .await;

    assert_eq!(hub.scrollback_snapshot(session_id).await.unwrap(), b"efgh1234");

    // A late viewer's blob is the capped tail, not the full history.
    let (_, mut rx) = attach_viewer(&hub, session_id).await;
    assert_eq!(recv_frame(&mut rx).await.as_ref(), b"efgh1234");
}

#[tokio::test]
async fn undecodable_output_drops_only_that_frame() {
    let (hub, _, _) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();
    let session_id = Uuid::new_v4();
    let _wrx = connect_worker(&hub, worker_id, user_id).await;
    let (_, mut rx) = attach_viewer(&hub, session_id).await;

    hub.handle_worker_message(
        worker_id,
        WorkerMessage::Output {
            session_id: session_id.to_string(),
            data: "not base64!!!".to_string(),
        },
    )
    .await;
    hub.handle_worker_message(worker_id, output(session_id, b"ok"))
        .await;

    assert_eq!(recv_frame(&mut rx).await.as_ref(), b"ok");
    assert!(rx.try_recv().is_err());
}

// ─── Worker lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn register_creates_worker_row_with_defaults() {
    let (hub, worker_repo, _) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();

    let _wrx = connect_worker(&hub, worker_id, user_id).await;

    let row = worker_repo.find_by_id(worker_id).await.unwrap().unwrap();
    assert_eq!(row.user_id, user_id);
    assert_eq!(row.name, "Worker");
    assert_eq!(row.status, WorkerStatus::Online);
    assert_eq!(row.capacity, termhub::workers::DEFAULT_CAPACITY);
}

#[tokio::test]
async fn reconnect_is_idempotent() {
    let (hub, worker_repo, _) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();

    let _rx1 = connect_worker(&hub, worker_id, user_id).await;
    hub.unregister_worker(worker_id).await;
    assert_eq!(
        worker_repo
            .find_by_id(worker_id)
            .await
            .unwrap()
            .unwrap()
            .status,
        WorkerStatus::Offline
    );

    let _rx2 = connect_worker(&hub, worker_id, user_id).await;

    assert_eq!(hub.worker_count().await, 1);
    assert!(hub.hosted_sessions(worker_id).await.is_empty());
    let row = worker_repo.find_by_id(worker_id).await.unwrap().unwrap();
    assert_eq!(row.status, WorkerStatus::Online);

    // Unregistering twice is harmless.
    hub.unregister_worker(worker_id).await;
    hub.unregister_worker(worker_id).await;
    assert_eq!(hub.worker_count().await, 0);
}

#[tokio::test]
async fn disconnect_marks_hosted_sessions_offline_and_resume_restores_them() {
    let (hub, _, session_repo) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();

    let mut wrx = connect_worker(&hub, worker_id, user_id).await;

    let sess = make_session(user_id, Some(worker_id), SessionStatus::Running);
    session_repo.create(&sess).await.unwrap();
    hub.handle_worker_message(worker_id, started(sess.id)).await;
    assert_eq!(hub.hosted_sessions(worker_id).await, vec![sess.id]);

    hub.handle_worker_message(worker_id, output(sess.id, b"ABC"))
        .await;
    let (_, mut vrx) = attach_viewer(&hub, sess.id).await;
    assert_eq!(recv_frame(&mut vrx).await.as_ref(), b"ABC");

    // Worker socket dies.
    hub.unregister_worker(worker_id).await;
    let row = session_repo.find_by_id(sess.id).await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Offline);
    assert_eq!(hub.bound_worker(sess.id).await, None);

    // Viewer input while offline is dropped, viewer stays attached.
    hub.send_input(sess.id, BASE64.encode(b"x")).await;
    assert_eq!(hub.viewer_count(sess.id).await, 1);

    // Reconnect: auto-resume issues the continuation spawn.
    drop(wrx);
    let mut wrx2 = connect_worker(&hub, worker_id, user_id).await;
    match recv_msg(&mut wrx2).await {
        ServerMessage::Spawn {
            session_id,
            command,
            work_dir,
        } => {
            assert_eq!(session_id, sess.id.to_string());
            assert_eq!(command, RESUME_COMMAND);
            assert_eq!(work_dir, "~");
        }
        other => panic!("expected spawn, got {other:?}"),
    }

    hub.handle_worker_message(worker_id, started(sess.id)).await;
    let row = session_repo.find_by_id(sess.id).await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Running);
    assert_eq!(hub.bound_worker(sess.id).await, Some(worker_id));

    // Output resumes, appended after the preserved scrollback.
    hub.handle_worker_message(worker_id, output(sess.id, b"DEF"))
        .await;
    assert_eq!(recv_frame(&mut vrx).await.as_ref(), b"DEF");
    assert_eq!(hub.scrollback_snapshot(sess.id).await.unwrap(), b"ABCDEF");
}

#[tokio::test]
async fn session_exited_persists_exit_code_and_clears_hosting() {
    let (hub, _, session_repo) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();
    let _wrx = connect_worker(&hub, worker_id, user_id).await;

    let sess = make_session(user_id, Some(worker_id), SessionStatus::Running);
    session_repo.create(&sess).await.unwrap();
    hub.handle_worker_message(worker_id, started(sess.id)).await;

    hub.handle_worker_message(
        worker_id,
        WorkerMessage::SessionExited {
            session_id: sess.id.to_string(),
            exit_code: Some(130),
        },
    )
    .await;

    let row = session_repo.find_by_id(sess.id).await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Stopped);
    assert_eq!(row.exit_code, Some(130));
    assert!(hub.hosted_sessions(worker_id).await.is_empty());

    // The relay is retained so late viewers can still read scrollback.
    assert!(hub.scrollback_snapshot(sess.id).await.is_some());
}

// ─── Control-message routing ────────────────────────────────────────────────

#[tokio::test]
async fn spawn_input_resize_kill_route_to_bound_worker() {
    let (hub, _, _) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();
    let session_id = Uuid::new_v4();
    let mut wrx = connect_worker(&hub, worker_id, user_id).await;

    hub.spawn_session(session_id, worker_id, "claude", "~").await;
    assert_eq!(
        recv_msg(&mut wrx).await,
        ServerMessage::Spawn {
            session_id: session_id.to_string(),
            command: "claude".to_string(),
            work_dir: "~".to_string(),
        }
    );

    hub.send_resize(session_id, 120, 40).await;
    assert_eq!(
        recv_msg(&mut wrx).await,
        ServerMessage::Resize {
            session_id: session_id.to_string(),
            cols: 120,
            rows: 40,
        }
    );

    hub.send_input(session_id, BASE64.encode(b"ls\n")).await;
    assert_eq!(
        recv_msg(&mut wrx).await,
        ServerMessage::Input {
            session_id: session_id.to_string(),
            data: "bHMK".to_string(),
        }
    );

    hub.kill_session(session_id).await;
    assert_eq!(
        recv_msg(&mut wrx).await,
        ServerMessage::Kill {
            session_id: session_id.to_string(),
        }
    );
}

#[tokio::test]
async fn spawn_to_disconnected_worker_is_dropped() {
    let (hub, _, _) = setup(1024).await;
    let session_id = Uuid::new_v4();

    // No worker registered at all: nothing to assert beyond "does not hang
    // or panic", and no relay should spring into existence bound to anyone.
    hub.spawn_session(session_id, Uuid::new_v4(), "claude", "~")
        .await;
    assert_eq!(hub.bound_worker(session_id).await, None);
    assert!(hub.scrollback_snapshot(session_id).await.is_none());
}

#[tokio::test]
async fn input_to_session_without_worker_is_dropped() {
    let (hub, _, _) = setup(1024).await;
    let session_id = Uuid::new_v4();

    // Viewer attaches to an unknown session: relay is created unbound.
    let (_, _vrx) = attach_viewer(&hub, session_id).await;
    hub.send_input(session_id, BASE64.encode(b"ls\n")).await;
    hub.send_resize(session_id, 80, 24).await;
    hub.kill_session(session_id).await;
    assert_eq!(hub.bound_worker(session_id).await, None);
}

#[tokio::test]
async fn unknown_message_type_changes_nothing() {
    let (hub, worker_repo, _) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();
    let mut wrx = connect_worker(&hub, worker_id, user_id).await;

    // As decoded from a frame like {"type":"lol","sessionId":...}.
    let msg: WorkerMessage =
        serde_json::from_str(r#"{"type":"lol","sessionId":"whatever"}"#).unwrap();
    hub.handle_worker_message(worker_id, msg).await;

    assert_eq!(hub.worker_count().await, 1);
    assert!(hub.hosted_sessions(worker_id).await.is_empty());
    assert_eq!(
        worker_repo
            .find_by_id(worker_id)
            .await
            .unwrap()
            .unwrap()
            .status,
        WorkerStatus::Online
    );
    assert!(wrx.try_recv().is_err());
}

#[tokio::test]
async fn unparseable_session_id_is_dropped() {
    let (hub, _, _) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();
    let _wrx = connect_worker(&hub, worker_id, user_id).await;

    hub.handle_worker_message(
        worker_id,
        WorkerMessage::SessionStarted {
            session_id: "not-a-uuid".to_string(),
        },
    )
    .await;
    assert!(hub.hosted_sessions(worker_id).await.is_empty());
}

// ─── Viewers ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn viewer_detach_is_idempotent_and_leaves_others_streaming() {
    let (hub, _, _) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();
    let session_id = Uuid::new_v4();
    let _wrx = connect_worker(&hub, worker_id, user_id).await;

    let (v1, mut rx1) = attach_viewer(&hub, session_id).await;
    let (_v2, mut rx2) = attach_viewer(&hub, session_id).await;

    hub.unregister_viewer(session_id, v1).await;
    hub.unregister_viewer(session_id, v1).await;
    assert_eq!(hub.viewer_count(session_id).await, 1);

    hub.handle_worker_message(worker_id, output(session_id, b"still here"))
        .await;
    assert_eq!(recv_frame(&mut rx2).await.as_ref(), b"still here");
    assert!(rx1.try_recv().is_err());
}

#[tokio::test]
async fn evict_discards_relay_and_scrollback() {
    let (hub, _, _) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();
    let session_id = Uuid::new_v4();
    let _wrx = connect_worker(&hub, worker_id, user_id).await;

    hub.handle_worker_message(worker_id, output(session_id, b"bye"))
        .await;
    assert!(hub.scrollback_snapshot(session_id).await.is_some());

    hub.evict(session_id).await;
    assert!(hub.scrollback_snapshot(session_id).await.is_none());
    assert_eq!(hub.viewer_count(session_id).await, 0);
}

// ─── Ping loop ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_loop_probes_registered_workers() {
    let (hub, _, _) = setup(1024).await;
    let user_id = Uuid::new_v4();
    let worker_id = Uuid::new_v4();
    let mut wrx = connect_worker(&hub, worker_id, user_id).await;

    let handle = hub.start_ping_loop(Duration::from_millis(20));
    assert_eq!(recv_msg(&mut wrx).await, ServerMessage::Ping);
    assert_eq!(recv_msg(&mut wrx).await, ServerMessage::Ping);
    handle.abort();

    // Pong is a no-op.
    hub.handle_worker_message(worker_id, WorkerMessage::Pong)
        .await;
    assert_eq!(hub.worker_count().await, 1);
}
