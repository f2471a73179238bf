//! Wire messages exchanged over the control websockets.
//!
//! All control frames are JSON text. Terminal payloads travel base64-encoded
//! in the `data` field on the worker leg — control messages (`spawn`,
//! `resize`, ...) are multiplexed on the same socket as `output`, so raw
//! binary frames are not an option there. On the viewer leg, output is
//! delivered as raw binary frames and only `resize` arrives as JSON.
//!
//! Decoding is total with respect to the `type` tag: unrecognised types map
//! to the `Unknown` variant, which the hub drops with a warning instead of
//! closing the connection.

use serde::{Deserialize, Serialize};

/// Messages a worker sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    /// PTY started for a session.
    #[serde(rename_all = "camelCase")]
    SessionStarted { session_id: String },
    /// PTY exited; `exit_code` is null when the process was signalled.
    #[serde(rename_all = "camelCase")]
    SessionExited {
        session_id: String,
        #[serde(default)]
        exit_code: Option<i32>,
    },
    /// A chunk of PTY stdout/stderr, base64-encoded.
    #[serde(rename_all = "camelCase")]
    Output { session_id: String, data: String },
    /// Reply to a server ping.
    Pong,
    /// Any type this server does not understand. Dropped by the hub.
    #[serde(other)]
    Unknown,
}

/// Messages the server sends to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Start a PTY running `command` with cwd `work_dir`.
    #[serde(rename_all = "camelCase")]
    Spawn {
        session_id: String,
        command: String,
        work_dir: String,
    },
    /// Write base64-decoded `data` to the PTY's stdin.
    #[serde(rename_all = "camelCase")]
    Input { session_id: String, data: String },
    /// TIOCSWINSZ on the PTY.
    #[serde(rename_all = "camelCase")]
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    /// Terminate the PTY.
    #[serde(rename_all = "camelCase")]
    Kill { session_id: String },
    /// Liveness probe.
    Ping,
}

/// Text frames a viewer sends to the server. Binary frames (raw keystrokes)
/// bypass this type entirely.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ViewerMessage {
    Resize { cols: u16, rows: u16 },
    /// Forward-compat: anything else is silently dropped by the adapter.
    #[serde(other)]
    Unknown,
}
