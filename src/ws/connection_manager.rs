use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Close code sent when a kick or ban is enforced.
pub const CLOSE_MODERATION: u16 = 4003;
pub const CLOSE_MODERATION_REASON: &str = "Moderation action enforced";

/// Instruction for a session's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A serialized `{type, payload}` frame.
    Frame(String),
    /// Transport-level ping; the pong restores the alive flag.
    Ping,
    /// Close the connection with the given code, then stop writing.
    Close { code: u16, reason: &'static str },
}

/// One live client connection.
///
/// The handle is shared between the connection manager and the session's
/// reader task; whichever drops last tears it down. `user_id` is `None`
/// until authentication completes.
pub struct SessionHandle {
    pub id: Uuid,
    pub remote_addr: IpAddr,
    tx: mpsc::UnboundedSender<Outbound>,
    user_id: StdRwLock<Option<Uuid>>,
    alive: AtomicBool,
}

impl SessionHandle {
    pub fn user_id(&self) -> Option<Uuid> {
        *self.user_id.read().expect("user_id lock poisoned")
    }

    /// Queue an outbound frame. Sends to a closed transport are dropped.
    pub fn send(&self, outbound: Outbound) {
        let _ = self.tx.send(outbound);
    }

    pub fn send_frame(&self, frame: String) {
        self.send(Outbound::Frame(frame));
    }

    pub fn close(&self, code: u16, reason: &'static str) {
        self.send(Outbound::Close { code, reason });
    }

    /// Restore the alive flag (called on pong).
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clear the alive flag, returning whether it was set.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }
}

/// Registry of live sessions. Cheaply cloneable; all clones share the same
/// map. Broadcast iterates over a snapshot so a session closing
/// mid-broadcast never races the lock.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<SessionHandle>>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new unauthenticated session.
    pub async fn add_session(
        &self,
        remote_addr: IpAddr,
    ) -> (Arc<SessionHandle>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(SessionHandle {
            id: Uuid::new_v4(),
            remote_addr,
            tx,
            user_id: StdRwLock::new(None),
            alive: AtomicBool::new(true),
        });

        self.sessions
            .write()
            .await
            .insert(handle.id, Arc::clone(&handle));
        (handle, rx)
    }

    pub async fn remove_session(&self, session_id: Uuid) {
        self.sessions.write().await.remove(&session_id);
    }

    /// Bind an authenticated identity. A user may hold several sessions.
    pub fn set_user(&self, session: &SessionHandle, user_id: Uuid) {
        *session.user_id.write().expect("user_id lock poisoned") = Some(user_id);
    }

    /// True iff any session other than `except` is bound to the user.
    pub async fn is_online(&self, user_id: Uuid, except: Option<Uuid>) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .any(|s| s.user_id() == Some(user_id) && Some(s.id) != except)
    }

    /// Write a frame to every session, authenticated or not.
    pub async fn broadcast(&self, frame: &str) {
        for session in self.snapshot().await {
            session.send_frame(frame.to_owned());
        }
    }

    /// Write a frame to every session bound to an identity.
    pub async fn broadcast_to_authenticated(&self, frame: &str) {
        for session in self.snapshot().await {
            if session.user_id().is_some() {
                session.send_frame(frame.to_owned());
            }
        }
    }

    /// Write a frame to every session bound to one user.
    pub async fn send_to_user(&self, user_id: Uuid, frame: &str) {
        for session in self.snapshot().await {
            if session.user_id() == Some(user_id) {
                session.send_frame(frame.to_owned());
            }
        }
    }

    /// Force-close every session bound to one user with the moderation
    /// close code.
    pub async fn close_user_connections(&self, user_id: Uuid) {
        for session in self.snapshot().await {
            if session.user_id() == Some(user_id) {
                session.close(CLOSE_MODERATION, CLOSE_MODERATION_REASON);
            }
        }
    }

    /// Remote address of any one session bound to the user.
    pub async fn get_user_ip(&self, user_id: Uuid) -> Option<IpAddr> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .find(|s| s.user_id() == Some(user_id))
            .map(|s| s.remote_addr)
    }

    /// Stable snapshot of all sessions for iteration outside the lock.
    pub async fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn add_and_remove_session() {
        let mgr = ConnectionManager::new();
        let (session, _rx) = mgr.add_session(ADDR).await;
        assert_eq!(mgr.session_count().await, 1);

        mgr.remove_session(session.id).await;
        assert_eq!(mgr.session_count().await, 0);
    }

    #[tokio::test]
    async fn is_online_respects_except() {
        let mgr = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (session, _rx) = mgr.add_session(ADDR).await;
        mgr.set_user(&session, user);

        assert!(mgr.is_online(user, None).await);
        assert!(!mgr.is_online(user, Some(session.id)).await);

        let (second, _rx2) = mgr.add_session(ADDR).await;
        mgr.set_user(&second, user);
        assert!(mgr.is_online(user, Some(session.id)).await);
    }

    #[tokio::test]
    async fn broadcast_to_authenticated_skips_anonymous() {
        let mgr = ConnectionManager::new();
        let (anon, mut anon_rx) = mgr.add_session(ADDR).await;
        let (authed, mut authed_rx) = mgr.add_session(ADDR).await;
        mgr.set_user(&authed, Uuid::new_v4());
        let _ = anon;

        mgr.broadcast_to_authenticated("hello").await;

        assert!(matches!(authed_rx.try_recv(), Ok(Outbound::Frame(f)) if f == "hello"));
        assert!(anon_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_user_hits_every_bound_session() {
        let mgr = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (a, mut a_rx) = mgr.add_session(ADDR).await;
        let (b, mut b_rx) = mgr.add_session(ADDR).await;
        mgr.set_user(&a, user);
        mgr.set_user(&b, user);

        mgr.send_to_user(user, "direct").await;

        assert!(matches!(a_rx.try_recv(), Ok(Outbound::Frame(f)) if f == "direct"));
        assert!(matches!(b_rx.try_recv(), Ok(Outbound::Frame(f)) if f == "direct"));
    }

    #[tokio::test]
    async fn close_user_connections_sends_moderation_code() {
        let mgr = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (session, mut rx) = mgr.add_session(ADDR).await;
        mgr.set_user(&session, user);

        mgr.close_user_connections(user).await;

        match rx.try_recv() {
            Ok(Outbound::Close { code, .. }) => assert_eq!(code, CLOSE_MODERATION),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_user_ip_returns_bound_address() {
        let mgr = ConnectionManager::new();
        let user = Uuid::new_v4();
        assert!(mgr.get_user_ip(user).await.is_none());

        let (session, _rx) = mgr.add_session(ADDR).await;
        mgr.set_user(&session, user);
        assert_eq!(mgr.get_user_ip(user).await, Some(ADDR));
    }

    #[tokio::test]
    async fn alive_flag_swaps() {
        let mgr = ConnectionManager::new();
        let (session, _rx) = mgr.add_session(ADDR).await;

        assert!(session.take_alive());
        assert!(!session.take_alive());
        session.mark_alive();
        assert!(session.take_alive());
    }

    #[tokio::test]
    async fn send_after_receiver_drop_is_noop() {
        let mgr = ConnectionManager::new();
        let (session, rx) = mgr.add_session(ADDR).await;
        drop(rx);
        // Writes to a closed transport are silently dropped.
        session.send_frame("late".into());
    }
}
