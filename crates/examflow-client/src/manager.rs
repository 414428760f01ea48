//! Reference-counted access to one shared session.
//!
//! Several dashboards can hold a [`SessionLease`] at the same time. The
//! first lease connects, later ones join, and the session is torn down only
//! when the last lease goes away.

use std::ops::Deref;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, info};

use crate::facade::{QueueSession, SessionConfig};
use crate::session::{ListenerId, SessionError, StaffCredential};
use crate::transport::Transport;

/// Hands out leases on a single [`QueueSession`].
#[derive(Debug)]
pub struct SessionManager {
    session: QueueSession,
    leases: Mutex<usize>,
}

static GLOBAL: OnceLock<Arc<SessionManager>> = OnceLock::new();

impl SessionManager {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        Self::from_session(QueueSession::new(config))
    }

    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::from_session(QueueSession::with_transport(config, transport))
    }

    fn from_session(session: QueueSession) -> Arc<Self> {
        Arc::new(Self {
            session,
            leases: Mutex::new(0),
        })
    }

    /// The process-wide manager. `config` is only used by the first call.
    pub fn global(config: SessionConfig) -> &'static Arc<SessionManager> {
        GLOBAL.get_or_init(|| Self::new(config))
    }

    /// Takes a lease and connects the session if needed.
    ///
    /// The callbacks behave as for [`QueueSession::connect`], except that
    /// they stay registered even when the session is already connected, and
    /// are removed when the lease is released.
    pub fn acquire<C, E>(
        self: &Arc<Self>,
        credential: impl Into<StaffCredential>,
        on_connected: C,
        on_error: E,
    ) -> SessionLease
    where
        C: Fn() + Send + Sync + 'static,
        E: Fn(&SessionError) + Send + Sync + 'static,
    {
        let (listener, start) = {
            let mut leases = self.lock();
            *leases += 1;
            debug!(leases = *leases, "session lease acquired");
            self.session.begin(
                credential.into(),
                Arc::new(on_connected),
                Arc::new(on_error),
                true,
            )
        };
        self.session.finish(start);

        SessionLease {
            manager: self.clone(),
            listener,
            released: false,
        }
    }

    /// Number of live leases.
    pub fn leases(&self) -> usize {
        *self.lock()
    }

    pub fn session(&self) -> &QueueSession {
        &self.session
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, usize> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Disconnects while still holding the count so a concurrent `acquire`
    /// either sees the live session or starts a fresh one.
    fn release_one(&self, listener: Option<ListenerId>) {
        let mut leases = self.lock();
        if let Some(id) = listener {
            self.session.remove_listener(id);
        }
        *leases = leases.saturating_sub(1);
        if *leases == 0 {
            info!("last session lease released");
            self.session.disconnect();
        } else {
            debug!(leases = *leases, "session lease released");
        }
    }
}

/// A consumer's share of the managed session.
#[derive(Debug)]
pub struct SessionLease {
    manager: Arc<SessionManager>,
    listener: Option<ListenerId>,
    released: bool,
}

impl SessionLease {
    /// Gives the lease back; same as dropping it.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release_one(self.listener.take());
        }
    }
}

impl Deref for SessionLease {
    type Target = QueueSession;

    fn deref(&self) -> &QueueSession {
        &self.manager.session
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;
    use tokio::sync::mpsc;
    use url::Url;

    use examflow_protocol::FrameCommand;

    use super::*;
    use crate::session::SessionState;
    use crate::transport::mock::{MockBroker, mock_transport};

    fn manager() -> (Arc<SessionManager>, MockBroker) {
        let (transport, broker) = mock_transport();
        let config = SessionConfig::new(Url::parse("https://clinic.test").unwrap());
        (SessionManager::with_transport(config, Arc::new(transport)), broker)
    }

    fn acquire(manager: &Arc<SessionManager>) -> (SessionLease, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let lease = manager.acquire(
            "staff-42",
            move || {
                let _ = tx.send(());
            },
            |_| {},
        );
        (lease, rx)
    }

    #[tokio::test]
    async fn leases_share_one_connection() {
        let (manager, mut broker) = manager();

        let (doctor, mut doctor_connected) = acquire(&manager);
        let _conn = broker.accept_session().await;
        doctor_connected.recv().await.unwrap();

        let (billing, mut billing_connected) = acquire(&manager);
        assert!(billing_connected.try_recv().is_ok());
        assert_eq!(manager.leases(), 2);
        assert_eq!(broker.opens(), 1);
        assert!(doctor.is_connected());
        assert!(billing.is_connected());
    }

    #[tokio::test]
    async fn session_outlives_all_but_the_last_lease() {
        let (manager, mut broker) = manager();

        let (doctor, mut connected) = acquire(&manager);
        let mut conn = broker.accept_session().await;
        connected.recv().await.unwrap();
        let (billing, _) = acquire(&manager);

        let mut broadcasts = billing.queue_broadcasts("reception").unwrap();
        let (id, destination) = conn.expect_subscribe().await;

        drop(doctor);
        assert_eq!(manager.leases(), 1);
        assert!(manager.session().is_connected());
        conn.message(&id, &destination, "2");
        assert!(broadcasts.next().await.is_some());

        billing.release();
        assert_eq!(manager.leases(), 0);
        assert_eq!(manager.session().state(), SessionState::Disconnected);
        assert!(broadcasts.next().await.is_none());

        let frames = conn.frames_until_close().await;
        assert_eq!(
            frames.last().map(|f| f.command),
            Some(FrameCommand::Disconnect)
        );
    }

    #[tokio::test]
    async fn reacquiring_after_release_reconnects() {
        let (manager, mut broker) = manager();

        let (lease, mut connected) = acquire(&manager);
        let _conn = broker.accept_session().await;
        connected.recv().await.unwrap();
        drop(lease);

        let (_lease, mut connected) = acquire(&manager);
        let _conn = broker.accept_session().await;
        tokio::time::timeout(Duration::from_secs(5), connected.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(broker.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn released_lease_stops_hearing_about_reconnects() {
        let (manager, mut broker) = manager();

        let (doctor, mut doctor_connected) = acquire(&manager);
        let conn = broker.accept_session().await;
        doctor_connected.recv().await.unwrap();
        let (_billing, mut billing_connected) = acquire(&manager);
        billing_connected.recv().await.unwrap();
        assert_eq!(manager.session().listeners(), 2);

        drop(doctor);
        assert_eq!(manager.session().listeners(), 1);

        conn.fail("connection reset");
        let _next = broker.accept_session().await;
        billing_connected.recv().await.unwrap();
        assert!(manager.session().is_connected());
        assert!(doctor_connected.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_release_drops_every_listener() {
        let (manager, mut broker) = manager();

        let (doctor, mut connected) = acquire(&manager);
        let _conn = broker.accept_session().await;
        connected.recv().await.unwrap();
        let (billing, _) = acquire(&manager);

        billing.release();
        doctor.release();
        assert_eq!(manager.leases(), 0);
        assert_eq!(manager.session().listeners(), 0);
        assert_eq!(manager.session().state(), SessionState::Disconnected);
    }
}
