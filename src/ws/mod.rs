//! WebSocket endpoints.
//!
//! Two long-lived socket kinds terminate here:
//!
//! - [`worker`] — `GET /api/worker/ws?token=<jwt>&workerId=<uuid>`, the
//!   control channel a remote PTY worker keeps open. JSON text frames in
//!   both directions.
//! - [`viewer`] — `GET /api/sessions/{id}/terminal?token=<jwt>`, a client
//!   watching (and typing into) one session. Text frames carry resize JSON
//!   upstream; binary frames carry raw keystrokes upstream and PTY output
//!   downstream.
//!
//! Both validate the JWT before the upgrade completes and refuse with a 401
//! JSON body on failure. Each accepted socket gets a writer task fed by an
//! mpsc channel so hub fan-out never touches the sink concurrently.

pub mod viewer;
pub mod worker;
