pub mod connection_manager;
pub mod events;
pub mod handler;

pub use connection_manager::{
    ConnectionManager, Outbound, SessionHandle, CLOSE_MODERATION, CLOSE_MODERATION_REASON,
};
pub use handler::websocket_handler;

use serde::Serialize;

use crate::state::AppState;
use events::Envelope;

/// Broadcast a gateway event to every authenticated session.
pub async fn broadcast_event(state: &AppState, event_type: &str, payload: impl Serialize) {
    let frame = Envelope::event(event_type, payload);
    state.connections.broadcast_to_authenticated(&frame).await;
}

/// Send a gateway event to every session bound to one user.
pub async fn send_event_to_user(
    state: &AppState,
    user_id: uuid::Uuid,
    event_type: &str,
    payload: impl Serialize,
) {
    let frame = Envelope::event(event_type, payload);
    state.connections.send_to_user(user_id, &frame).await;
}

/// Reply to the calling session only.
pub fn reply(session: &SessionHandle, event_type: &str, payload: impl Serialize) {
    session.send_frame(Envelope::event(event_type, payload));
}

/// Interval between keep-alive pings. A session that misses the whole
/// window without a pong is terminated at the next tick.
const KEEPALIVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Spawn the keep-alive ticker: every tick pings all sessions and
/// terminates those whose alive flag was never restored by a pong.
pub fn spawn_keepalive(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for session in state.connections.snapshot().await {
                if session.take_alive() {
                    session.send(Outbound::Ping);
                } else {
                    tracing::debug!(session_id = %session.id, "Session missed keep-alive; terminating");
                    session.close(1001, "Keep-alive timeout");
                }
            }
        }
    });
}
