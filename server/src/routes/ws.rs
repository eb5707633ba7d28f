//! WebSocket handler: the realtime leg of board sync.
//!
//! ARCHITECTURE
//! ============
//! Each socket gets one bounded outbound queue registered with the broadcast
//! channel. The connection task selects over inbound socket messages and
//! that queue; when the queue closes (the reaper dropped the connection)
//! the task ends and the socket goes with it.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade: `?ticket=` (single-use) for members, `?public_id=` for
//!    anonymous read-only viewers. Bad credentials fail before upgrade.
//! 2. Connect: register with channel + registry, send `session:connected`.
//! 3. Loop: `session:heartbeat`, `board:join`, `board:leave`,
//!    `task:move-intent` from the client; queued events to the client.
//! 4. Close: unregister and republish presence for vacated boards.
//!
//! Frames are JSON text by default; `?format=protobuf` switches the socket
//! to binary frames in both directions.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use frames::events::{self, MoveIntent};
use frames::{Data, ErrorCode, Frame, Status, to_data};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::board::{self, BoardError};
use crate::services::{connection, session};
use crate::state::AppState;
use crate::store::User;

// =============================================================================
// PEERS AND OUTCOMES
// =============================================================================

/// Who is on the other end of the socket.
enum Peer {
    Member(User),
    /// Anonymous viewer of a shared board.
    Public(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Json,
    Protobuf,
}

/// Result returned by syscall handlers. Handlers never write to the socket;
/// the dispatch layer turns an outcome into the reply.
enum Outcome {
    /// Send done+data to the sender.
    Reply(Data),
    /// Send an empty done to the sender.
    Done,
    /// Nothing for the sender; peers were already notified.
    Silent,
}

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
    #[error("public connections are read-only")]
    ReadOnly,
    #[error("invalid payload: {0}")]
    Payload(String),
    #[error(transparent)]
    Board(#[from] BoardError),
}

impl ErrorCode for DispatchError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
            Self::ReadOnly => "E_READ_ONLY",
            Self::Payload(_) => "E_INVALID",
            Self::Board(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Board(e) => e.retryable(),
            _ => false,
        }
    }
}

#[derive(Deserialize)]
struct BoardRef {
    board_id: Uuid,
}

// =============================================================================
// UPGRADE
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub ticket: Option<String>,
    pub public_id: Option<String>,
    pub format: Option<String>,
}

/// `GET /api/ws` — authenticate, then upgrade.
pub async fn handle_ws(State(state): State<AppState>, Query(params): Query<WsParams>, ws: WebSocketUpgrade) -> Response {
    let format = match params.format.as_deref() {
        Some("protobuf") => WireFormat::Protobuf,
        _ => WireFormat::Json,
    };

    let peer = match (params.ticket, params.public_id) {
        (Some(ticket), _) => match authenticate(&state, &ticket).await {
            Ok(Some(user)) => Peer::Member(user),
            Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid or expired ticket").into_response(),
            Err(status) => return (status, "ticket validation error").into_response(),
        },
        (None, Some(public_id)) => match board::public_snapshot(&state, &public_id).await {
            Ok(_) => Peer::Public(public_id),
            Err(BoardError::BoardNotFound(_)) => return (StatusCode::NOT_FOUND, "unknown public board").into_response(),
            Err(e) => {
                tracing::error!(error = %e, "public board lookup failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
        (None, None) => return (StatusCode::UNAUTHORIZED, "ticket required").into_response(),
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, peer, format))
}

async fn authenticate(state: &AppState, ticket: &str) -> Result<Option<User>, StatusCode> {
    let store = state.store.as_ref();
    let internal = |e: crate::store::StoreError| {
        tracing::error!(error = %e, "ws ticket validation failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let Some(user_id) = session::consume_ws_ticket(store, ticket).await.map_err(internal)? else {
        return Ok(None);
    };
    store.get_user(user_id).await.map_err(internal)
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, peer: Peer, format: WireFormat) {
    let connection_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_queue_capacity);

    let member = match &peer {
        Peer::Member(user) => Some(user),
        Peer::Public(_) => None,
    };
    connection::connect(&state, connection_id, member, client_tx).await;

    let Some(welcome) = welcome_frame(&state, connection_id, &peer).await else {
        connection::disconnect(&state, connection_id).await;
        return;
    };
    if send_frame(&mut socket, format, &welcome).await.is_err() {
        connection::disconnect(&state, connection_id).await;
        return;
    }
    info!(%connection_id, user_id = ?member.map(|u| u.id), "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let inbound = match msg {
                    Message::Text(text) => serde_json::from_str::<Frame>(text.as_str()).map_err(|e| e.to_string()),
                    Message::Binary(bytes) => frames::decode_frame(&bytes).map_err(|e| e.to_string()),
                    Message::Close(_) => break,
                    _ => continue,
                };
                let reply = match inbound {
                    Ok(req) => process_frame(&state, connection_id, &peer, req).await,
                    Err(e) => {
                        warn!(%connection_id, error = %e, "ws: invalid inbound frame");
                        Some(Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid frame: {e}")))
                    }
                };
                if let Some(frame) = reply {
                    if send_frame(&mut socket, format, &frame).await.is_err() {
                        break;
                    }
                }
            }
            frame = client_rx.recv() => {
                // A closed queue means the connection was reaped or evicted.
                let Some(frame) = frame else {
                    info!(%connection_id, "ws: queue closed, dropping socket");
                    break;
                };
                if send_frame(&mut socket, format, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    connection::disconnect(&state, connection_id).await;
    info!(%connection_id, "ws: client disconnected");
}

/// `session:connected` for members; anonymous viewers also get the redacted
/// snapshot and join the public group here.
async fn welcome_frame(state: &AppState, connection_id: Uuid, peer: &Peer) -> Option<Frame> {
    let config = state.presence.config();
    let frame = Frame::request(events::SESSION_CONNECTED, Data::new())
        .with_data("connection_id", connection_id.to_string())
        .with_data("heartbeat_interval_ms", config.heartbeat_interval_ms())
        .with_data("presence_timeout_ms", config.presence_timeout_ms());

    match peer {
        Peer::Member(user) => Some(frame.with_data("user", json!(user))),
        Peer::Public(public_id) => match connection::join_public(state, connection_id, public_id).await {
            Ok(snapshot) => Some(
                frame
                    .with_board_id(snapshot.id)
                    .with_data("public_id", public_id.clone())
                    .with_data("board", json!(snapshot)),
            ),
            Err(e) => {
                warn!(%connection_id, public_id, error = %e, "ws: public join failed");
                None
            }
        },
    }
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Dispatch one inbound frame and build the reply for the sender, if any.
async fn process_frame(state: &AppState, connection_id: Uuid, peer: &Peer, mut req: Frame) -> Option<Frame> {
    if req.syscall != events::SESSION_HEARTBEAT {
        debug!(%connection_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    let result = match peer {
        Peer::Member(user) => {
            req.from = Some(user.id.to_string());
            handle_member(state, connection_id, user, &req).await
        }
        Peer::Public(_) => handle_public(&req),
    };

    match result {
        Ok(Outcome::Reply(data)) => Some(req.done_with(data)),
        Ok(Outcome::Done) => Some(req.done()),
        Ok(Outcome::Silent) => None,
        Err(e) => Some(req.error_from(&e)),
    }
}

async fn handle_member(state: &AppState, connection_id: Uuid, user: &User, req: &Frame) -> Result<Outcome, DispatchError> {
    match req.syscall.as_str() {
        events::SESSION_HEARTBEAT => match connection::heartbeat(state, connection_id, user.id).await {
            Some(presence) => Ok(Outcome::Reply(to_data(&presence))),
            None => Ok(Outcome::Done),
        },
        events::BOARD_JOIN => {
            let BoardRef { board_id } = decode(req)?;
            let viewers = connection::join(state, connection_id, user, board_id).await?;
            let snapshot = board::get_board(state, user, board_id).await?;
            let mut data = Data::new();
            data.insert("board_id".into(), json!(board_id));
            data.insert("users".into(), json!(viewers));
            data.insert("board".into(), json!(snapshot));
            Ok(Outcome::Reply(data))
        }
        events::BOARD_LEAVE => {
            let BoardRef { board_id } = decode(req)?;
            let left = connection::leave(state, connection_id, user, board_id).await;
            Ok(Outcome::Reply(Data::from([("left".to_string(), json!(left))])))
        }
        events::TASK_MOVE_INTENT => {
            let intent: MoveIntent = decode(req)?;
            connection::move_intent(state, connection_id, user, &intent).await?;
            Ok(Outcome::Silent)
        }
        other => Err(DispatchError::UnknownSyscall(other.to_string())),
    }
}

fn handle_public(req: &Frame) -> Result<Outcome, DispatchError> {
    match req.syscall.as_str() {
        events::SESSION_HEARTBEAT => Ok(Outcome::Done),
        events::BOARD_JOIN | events::BOARD_LEAVE | events::TASK_MOVE_INTENT => Err(DispatchError::ReadOnly),
        other => Err(DispatchError::UnknownSyscall(other.to_string())),
    }
}

fn decode<T: serde::de::DeserializeOwned>(req: &Frame) -> Result<T, DispatchError> {
    req.decode().map_err(|e| DispatchError::Payload(e.to_string()))
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, format: WireFormat, frame: &Frame) -> Result<(), ()> {
    let message = match format {
        WireFormat::Json => match serde_json::to_string(frame) {
            Ok(json) => Message::Text(json.into()),
            Err(e) => {
                warn!(error = %e, "ws: failed to serialize frame");
                return Err(());
            }
        },
        WireFormat::Protobuf => Message::Binary(frames::encode_frame(frame).into()),
    };

    if frame.status == Status::Error {
        let code = frame.data.get("code").and_then(|v| v.as_str()).unwrap_or("-");
        let message = frame.data.get("message").and_then(|v| v.as_str()).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else if frame.syscall != events::TASK_MOVE_INTENT && frame.syscall != events::SESSION_HEARTBEAT {
        debug!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }

    socket.send(message).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
