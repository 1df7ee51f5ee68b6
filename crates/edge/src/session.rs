//! Client-address keyed forwarding sessions.

use std::{
    collections::{HashMap, HashSet},
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::{net::UdpSocket, task::AbortHandle};

/// Activity clock shared between the accept loop and a session's relay.
#[derive(Debug)]
pub struct SessionState {
    epoch: Instant,
    last_activity_ms: AtomicU64,
    closed: AtomicBool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(epoch: Instant) -> Self {
        Self {
            epoch,
            last_activity_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&self, now: Instant) {
        let ms = now.saturating_duration_since(self.epoch).as_millis() as u64;
        self.last_activity_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed))
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap copy of what the accept loop needs to forward a datagram.
#[derive(Debug, Clone)]
pub struct SessionRoute {
    pub backend: SocketAddr,
    pub socket: Arc<UdpSocket>,
    pub state: Arc<SessionState>,
}

impl SessionRoute {
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}

/// A client pinned to one backend. Dropping the session stops its relay.
#[derive(Debug)]
pub struct Session {
    pub backend: SocketAddr,
    socket: Arc<UdpSocket>,
    state: Arc<SessionState>,
    relay: Option<AbortHandle>,
}

impl Session {
    pub fn new(
        backend: SocketAddr,
        socket: Arc<UdpSocket>,
        state: Arc<SessionState>,
        relay: Option<AbortHandle>,
    ) -> Self {
        Self {
            backend,
            socket,
            state,
            relay,
        }
    }

    pub fn route(&self) -> SessionRoute {
        SessionRoute {
            backend: self.backend,
            socket: self.socket.clone(),
            state: self.state.clone(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
    }
}

/// Why the reaper dropped a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapReason {
    Idle,
    Closed,
    BackendUnhealthy,
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<SocketAddr, Session>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route for `client`, marking the session active at `now`. The mark is
    /// made under the table lock, so a concurrent reap either removes the
    /// session first or sees it as active.
    pub fn touch(&self, client: SocketAddr, now: Instant) -> Option<SessionRoute> {
        let sessions = self.lock();
        let session = sessions.get(&client)?;
        session.state.touch_at(now);
        Some(session.route())
    }

    /// Stores `session` for `client`, handing back any session it replaced.
    pub fn insert(&self, client: SocketAddr, session: Session) -> Option<Session> {
        self.lock().insert(client, session)
    }

    pub fn remove(&self, client: SocketAddr) -> Option<Session> {
        self.lock().remove(&client)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn drain(&self) -> Vec<(SocketAddr, Session)> {
        self.lock().drain().collect()
    }

    /// Removes sessions idle for longer than `idle_timeout`, sessions whose
    /// relay has closed, and, when `healthy` is given, sessions pinned to a
    /// backend outside that set.
    pub fn reap(
        &self,
        now: Instant,
        idle_timeout: Duration,
        healthy: Option<&HashSet<IpAddr>>,
    ) -> Vec<(SocketAddr, Session, ReapReason)> {
        let mut sessions = self.lock();
        let doomed: Vec<(SocketAddr, ReapReason)> = sessions
            .iter()
            .filter_map(|(client, session)| {
                let reason = if !session.state.is_open() {
                    ReapReason::Closed
                } else if session.state.idle_for(now) > idle_timeout {
                    ReapReason::Idle
                } else if healthy.is_some_and(|set| !set.contains(&session.backend.ip())) {
                    ReapReason::BackendUnhealthy
                } else {
                    return None;
                };
                Some((*client, reason))
            })
            .collect();

        doomed
            .into_iter()
            .filter_map(|(client, reason)| {
                sessions
                    .remove(&client)
                    .map(|session| (client, session, reason))
            })
            .collect()
    }
}
