use std::{net::SocketAddr, sync::Arc, time::Duration};

use core::net::AddrParseError;

use ferry_config::config::Listener;
use ferry_lb::{LbError, NodeRegistry, RoundRobin};
use tokio::net::UdpSocket;

pub mod balancer;
pub mod session;
pub mod signup;
pub mod udp_listener;

pub use balancer::{Balancer, RunningBalancer};
pub use session::{Session, SessionRoute, SessionState, SessionTable};
pub use signup::SignupServer;

#[derive(Debug)]
pub enum ProxyError {
    InvalidConfig(String),
    Bind(SocketAddr, std::io::Error),
    Socket(std::io::Error),
    Select(LbError),
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            ProxyError::Bind(addr, err) => write!(f, "Failed to bind {}: {}", addr, err),
            ProxyError::Socket(err) => write!(f, "Socket error: {}", err),
            ProxyError::Select(err) => write!(f, "Backend selection failed: {}", err),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<LbError> for ProxyError {
    fn from(err: LbError) -> Self {
        ProxyError::Select(err)
    }
}

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub name: String,
    pub address: SocketAddr,
    pub backend_port: u16,
    pub idle_timeout: Duration,
    pub drop_sessions_on_unhealthy: bool,
}

impl ListenerSettings {
    pub fn from_config(listener: &Listener) -> Result<Self, ProxyError> {
        let address = listener
            .address
            .parse()
            .map_err(|err: AddrParseError| {
                ProxyError::InvalidConfig(format!(
                    "listener '{}' address '{}': {}",
                    listener.name, listener.address, err
                ))
            })?;

        Ok(Self {
            name: listener.name.clone(),
            address,
            backend_port: listener.backend_port,
            idle_timeout: Duration::from_millis(listener.session_idle_timeout_ms.max(1)),
            drop_sessions_on_unhealthy: listener.drop_sessions_on_unhealthy,
        })
    }
}

/// Public UDP listener for one forwarded service.
pub struct UdpProxy {
    pub settings: ListenerSettings,
    pub socket: Arc<UdpSocket>,
    pub local_addr: SocketAddr,
    pub registry: NodeRegistry,
    pub sessions: Arc<SessionTable>,
    pub selector: RoundRobin,
}
