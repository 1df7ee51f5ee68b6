use std::{
    collections::HashSet,
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use ferry_lb::{NodeRegistry, RoundRobin};
use log::{debug, error, info, warn};
use tokio::{net::UdpSocket, sync::watch, task::JoinHandle};

use crate::{
    ListenerSettings, ProxyError, UdpProxy,
    session::{ReapReason, Session, SessionRoute, SessionState, SessionTable},
};

const MAX_DATAGRAM: usize = 65_535;
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(10);

impl UdpProxy {
    pub async fn bind(
        settings: ListenerSettings,
        registry: NodeRegistry,
    ) -> Result<Self, ProxyError> {
        let socket = UdpSocket::bind(settings.address)
            .await
            .map_err(|e| ProxyError::Bind(settings.address, e))?;
        let local_addr = socket.local_addr().map_err(ProxyError::Socket)?;

        info!(
            "Listener '{}' on udp://{} forwarding to backend port {}",
            settings.name, local_addr, settings.backend_port
        );

        Ok(Self {
            settings,
            socket: Arc::new(socket),
            local_addr,
            registry,
            sessions: Arc::new(SessionTable::new()),
            selector: RoundRobin::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sessions(&self) -> Arc<SessionTable> {
        self.sessions.clone()
    }

    /// Accept loop. Runs until `shutdown` changes or its sender is
    /// dropped; all sessions are torn down on exit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let reaper = self.spawn_reaper(shutdown.clone());
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let received = tokio::select! {
                received = self.socket.recv_from(&mut buf) => received,
                _ = shutdown.changed() => break,
            };

            match received {
                Ok((len, client)) => self.handle_datagram(client, &buf[..len]).await,
                Err(e) => warn!("Listener '{}' receive error: {}", self.settings.name, e),
            }
        }

        reaper.abort();
        for (_, session) in self.sessions.drain() {
            self.registry.connection_closed(session.backend.ip());
        }
        info!("Listener '{}' stopped", self.settings.name);
    }

    async fn handle_datagram(&mut self, client: SocketAddr, payload: &[u8]) {
        let route = match self.sessions.touch(client, Instant::now()) {
            Some(route) if route.is_open() => route,
            _ => match self.open_session(client).await {
                Ok(route) => route,
                Err(e) => {
                    warn!(
                        "Listener '{}' dropped datagram from {}: {}",
                        self.settings.name, client, e
                    );
                    return;
                }
            },
        };

        match route.socket.send(payload).await {
            Ok(_) => debug!("{} -> {}: {} bytes", client, route.backend, payload.len()),
            Err(e) => warn!("Forwarding {} -> {} failed: {}", client, route.backend, e),
        }
    }

    async fn open_session(&mut self, client: SocketAddr) -> Result<SessionRoute, ProxyError> {
        let ip = self.selector.pick(&self.registry)?;
        let backend = SocketAddr::new(ip, self.settings.backend_port);

        let socket = UdpSocket::bind(unspecified_for(backend))
            .await
            .map_err(ProxyError::Socket)?;
        socket.connect(backend).await.map_err(ProxyError::Socket)?;
        let socket = Arc::new(socket);

        let state = Arc::new(SessionState::new());
        let relay = tokio::spawn(relay_replies(
            self.socket.clone(),
            socket.clone(),
            client,
            state.clone(),
        ));

        let session = Session::new(backend, socket, state, Some(relay.abort_handle()));
        let route = session.route();
        if let Some(old) = self.sessions.insert(client, session) {
            self.registry.connection_closed(old.backend.ip());
        }
        self.registry.connection_opened(ip);

        info!(
            "Listener '{}' pinned {} to {}",
            self.settings.name, client, backend
        );
        Ok(route)
    }

    fn spawn_reaper(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        let registry = self.registry.clone();
        let settings = self.settings.clone();
        let period = (settings.idle_timeout / 2).max(MIN_REAP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => reap_sessions(&sessions, &registry, &settings),
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

fn reap_sessions(sessions: &SessionTable, registry: &NodeRegistry, settings: &ListenerSettings) {
    let healthy: Option<HashSet<IpAddr>> = settings
        .drop_sessions_on_unhealthy
        .then(|| registry.snapshot_healthy().into_iter().collect());

    let reaped = sessions.reap(Instant::now(), settings.idle_timeout, healthy.as_ref());
    for (client, session, reason) in reaped {
        registry.connection_closed(session.backend.ip());
        match reason {
            ReapReason::Idle => debug!("Session {} -> {} expired", client, session.backend),
            ReapReason::Closed => debug!("Session {} -> {} closed", client, session.backend),
            ReapReason::BackendUnhealthy => info!(
                "Session {} -> {} dropped: backend unhealthy",
                client, session.backend
            ),
        }
    }
}

/// Copies every datagram the backend sends on `backend` back to `client`
/// through the public socket.
async fn relay_replies(
    public: Arc<UdpSocket>,
    backend: Arc<UdpSocket>,
    client: SocketAddr,
    state: Arc<SessionState>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match backend.recv(&mut buf).await {
            Ok(len) => {
                state.touch();
                if let Err(e) = public.send_to(&buf[..len], client).await {
                    warn!("Relaying reply to {} failed: {}", client, e);
                }
            }
            // icmp port unreachable from the backend; the session stays usable
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                debug!("Backend for {} refused a datagram", client);
            }
            Err(e) => {
                error!("Relay for {} stopped: {}", client, e);
                state.close();
                break;
            }
        }
    }
}

fn unspecified_for(backend: SocketAddr) -> SocketAddr {
    match backend {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}
