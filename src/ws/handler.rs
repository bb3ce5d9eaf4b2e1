use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use uuid::Uuid;

use super::connection_manager::{Outbound, SessionHandle};
use super::events::{self, Envelope, EVENT_PONG, EVENT_USER_OFFLINE};
use crate::auth::CHALLENGE_LEN;
use crate::handlers;
use crate::state::AppState;

// ============================================================================
// Session state machine
// ============================================================================

/// Per-session authentication stage:
/// `connected → challenged → authenticated` (termination drops the task).
pub enum AuthStage {
    Connected,
    Challenged {
        challenge: [u8; CHALLENGE_LEN],
        public_key: String,
        user_id: Uuid,
        is_new_user: bool,
        requested_username: String,
    },
    Authenticated {
        user_id: Uuid,
    },
}

impl AuthStage {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            AuthStage::Authenticated { user_id } => Some(*user_id),
            _ => None,
        }
    }
}

// ============================================================================
// Upgrade handler
// ============================================================================

/// GET /ws — upgrade to a gateway connection.
///
/// No credentials are required at upgrade time; identity is established by
/// the in-band challenge-response exchange. Ban rules are evaluated as
/// soon as the client announces a public key.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

// ============================================================================
// Connection lifecycle
// ============================================================================

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: AppState) {
    let (session, mut rx) = state.connections.add_session(addr.ip()).await;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Writer: drain the outbound queue onto the socket. A `Close`
    // instruction emits a proper close frame and stops the task.
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let result = match outbound {
                Outbound::Frame(frame) => ws_sender.send(Message::Text(frame)).await,
                Outbound::Ping => ws_sender.send(Message::Ping(Vec::new())).await,
                Outbound::Close { code, reason } => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Reader: frames are processed strictly in receive order.
    let reader_session = Arc::clone(&session);
    let reader_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut stage = AuthStage::Connected;
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&reader_state, &reader_session, &mut stage, &text).await;
                }
                Some(Ok(Message::Pong(_))) => reader_session.mark_alive(),
                // Ping frames are answered transparently by the underlying
                // library; binary frames are not part of the protocol.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Binary(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(
                        session_id = %reader_session.id,
                        error = ?e,
                        "WebSocket receive error; closing connection"
                    );
                    break;
                }
            }
        }
        stage.user_id()
    });

    // Wait for either task to finish, then abort the other.
    let authenticated_user = tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            session.user_id()
        }
        user = &mut recv_task => {
            send_task.abort();
            user.ok().flatten().or_else(|| session.user_id())
        }
    };

    cleanup(&state, &session, authenticated_user).await;
}

/// Session teardown: deregister, leave voice rooms, and announce
/// `user_offline` when no other session remains for the identity.
async fn cleanup(state: &AppState, session: &SessionHandle, user_id: Option<Uuid>) {
    state.connections.remove_session(session.id).await;

    let Some(user_id) = user_id else {
        return;
    };

    if let Some((channel_id, closed)) = state.rooms.leave_everywhere(user_id).await {
        handlers::voice::announce_departure(state, channel_id, user_id, closed).await;
    }

    if !state.connections.is_online(user_id, None).await {
        super::broadcast_event(
            state,
            EVENT_USER_OFFLINE,
            serde_json::json!({ "userId": user_id }),
        )
        .await;
    }
}

// ============================================================================
// Frame dispatch
// ============================================================================

/// Process one text frame. Errors are reported to the caller with an
/// `error{message}` frame; the session itself always survives them.
async fn handle_frame(state: &AppState, session: &Arc<SessionHandle>, stage: &mut AuthStage, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(session_id = %session.id, error = ?e, "Unparseable gateway frame");
            session.send_frame(events::error_frame("Invalid message format"));
            return;
        }
    };

    let msg_type = events::normalize_type(&envelope.r#type).to_owned();

    // Application-level keep-alive, honored in every stage.
    if msg_type == "ping" {
        session.mark_alive();
        super::reply(session, EVENT_PONG, serde_json::json!({}));
        return;
    }

    let authenticated_user = stage.user_id();
    let result = match msg_type.as_str() {
        "auth:request" => {
            handlers::auth::handle_auth_request(state, session, stage, envelope.payload).await
        }
        "auth:response" => {
            handlers::auth::handle_auth_response(state, session, stage, envelope.payload).await
        }
        _ => match authenticated_user {
            Some(user_id) => {
                dispatch_authenticated(state, session, user_id, &msg_type, envelope.payload).await
            }
            // Everything else requires authentication.
            None => {
                session.send_frame(events::error_frame("Not authenticated"));
                return;
            }
        },
    };

    if let Err(e) = result {
        tracing::warn!(
            session_id = %session.id,
            msg_type = %msg_type,
            error = %e,
            "Gateway request failed"
        );
        session.send_frame(events::error_frame(&e.client_message()));
    }
}

/// Typed dispatch table for authenticated requests. Unknown types log and
/// drop without a reply.
async fn dispatch_authenticated(
    state: &AppState,
    session: &Arc<SessionHandle>,
    user_id: Uuid,
    msg_type: &str,
    payload: serde_json::Value,
) -> crate::error::AppResult<()> {
    use crate::db;

    // Role checks always use the caller's current row, not a cached copy.
    let caller = db::users::get(&state.pool, user_id).await?;

    match msg_type {
        // Channels
        "get_channels" => handlers::channels::get_channels(state, session, &caller).await,
        "create_channel" => {
            handlers::channels::create_channel(state, session, &caller, payload).await
        }
        "delete_channel" => {
            handlers::channels::delete_channel(state, session, &caller, payload).await
        }

        // Messages & read state
        "get_messages" => handlers::messages::get_messages(state, session, &caller, payload).await,
        "send_message" => handlers::messages::send_message(state, session, &caller, payload).await,
        "mark_channel_read" => {
            handlers::messages::mark_channel_read(state, &caller, payload).await
        }

        // Folder channels
        "folder_list_files" => {
            handlers::folder::list_files(state, session, &caller, payload).await
        }
        "folder_upload_file" => {
            handlers::folder::upload_file(state, session, &caller, payload).await
        }
        "folder_download_file" => {
            handlers::folder::download_file(state, session, &caller, payload).await
        }
        "folder_delete_file" => {
            handlers::folder::delete_file(state, session, &caller, payload).await
        }

        // Voice
        "join_voice_channel" => handlers::voice::join(state, session, &caller, payload).await,
        "leave_voice_channel" => handlers::voice::leave(state, session, &caller, payload).await,
        "create_webrtc_transport" => {
            handlers::voice::create_transport(state, session, &caller, payload).await
        }
        "connect_webrtc_transport" => {
            handlers::voice::connect_transport(state, session, &caller, payload).await
        }
        "produce" => handlers::voice::produce(state, session, &caller, payload).await,
        "close_producer" => handlers::voice::close_producer(state, session, &caller, payload).await,
        "consume" => handlers::voice::consume(state, session, &caller, payload).await,
        "resume_consumer" => {
            handlers::voice::resume_consumer(state, session, &caller, payload).await
        }
        "get_producers" => handlers::voice::get_producers(state, session, &caller, payload).await,
        "voice_state_update" => {
            handlers::voice::voice_state_update(state, &caller, payload).await
        }

        // Moderation
        "kick_member" => handlers::moderation::kick_member(state, session, &caller, payload).await,
        "ban_member" => handlers::moderation::ban_member(state, session, &caller, payload).await,

        // Administration
        "submit_admin_key" => {
            handlers::server_settings::submit_admin_key(state, session, &caller, payload).await
        }
        "update_server_settings" => {
            handlers::server_settings::update_server_settings(state, session, &caller, payload)
                .await
        }
        "get_server_storage_settings" => {
            handlers::server_settings::get_storage_settings(state, session, &caller).await
        }
        "test_server_storage" => {
            handlers::server_settings::test_storage(state, session, &caller, payload).await
        }

        other => {
            tracing::debug!(msg_type = %other, "Unknown gateway request type; dropping");
            Ok(())
        }
    }
}
