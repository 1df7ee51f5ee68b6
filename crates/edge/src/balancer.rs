//! Wires the registry, health monitor, UDP listeners and signup endpoint
//! for one balancer process.

use std::net::{IpAddr, SocketAddr};

use ferry_config::config::Config;
use ferry_health::{HealthCheck, HealthMonitor, MonitorSettings};
use ferry_lb::NodeRegistry;
use log::{error, info};
use tokio::{sync::watch, task::JoinHandle};

use crate::{ListenerSettings, ProxyError, UdpProxy, signup::SignupServer};

pub struct Balancer {
    config: Config,
    registry: NodeRegistry,
}

impl Balancer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: NodeRegistry::new(),
        }
    }

    /// Binds every public socket, then starts the background tasks. A bind
    /// failure aborts startup before anything is spawned.
    pub async fn start(self) -> Result<RunningBalancer, ProxyError> {
        let Balancer { config, registry } = self;

        let check =
            HealthCheck::from_config(&config.health_check).map_err(ProxyError::InvalidConfig)?;
        let monitor_settings = MonitorSettings::from_config(&config.health_check);

        let mut static_nodes = Vec::with_capacity(config.nodes.len());
        for node in &config.nodes {
            let ip: IpAddr = node
                .parse()
                .map_err(|_| ProxyError::InvalidConfig(format!("invalid node address: {node}")))?;
            static_nodes.push(ip);
        }

        let mut proxies = Vec::with_capacity(config.listeners.len());
        for listener in &config.listeners {
            let settings = ListenerSettings::from_config(listener)?;
            proxies.push(UdpProxy::bind(settings, registry.clone()).await?);
        }

        let signup_addr: SocketAddr = config.signup.address.parse().map_err(|_| {
            ProxyError::InvalidConfig(format!(
                "invalid signup address: {}",
                config.signup.address
            ))
        })?;
        let signup = SignupServer::bind(signup_addr, registry.clone()).await?;

        for ip in static_nodes {
            registry.register(ip);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let monitor = HealthMonitor::new(registry.clone(), check, monitor_settings);
        tasks.push(monitor.spawn(shutdown_rx.clone()));

        let mut listeners = Vec::with_capacity(proxies.len());
        for proxy in proxies {
            listeners.push((proxy.settings.name.clone(), proxy.local_addr()));
            tasks.push(tokio::spawn(proxy.run(shutdown_rx.clone())));
        }

        let signup_addr = signup.local_addr();
        tasks.push(tokio::spawn(signup.run(shutdown_rx)));

        info!(
            "Balancer started with {} listener(s), {} node(s) registered",
            listeners.len(),
            registry.len()
        );

        Ok(RunningBalancer {
            registry,
            listeners,
            signup_addr,
            shutdown_tx,
            tasks,
        })
    }
}

pub struct RunningBalancer {
    registry: NodeRegistry,
    listeners: Vec<(String, SocketAddr)>,
    signup_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningBalancer {
    /// Registration entry point; same effect as a signup request.
    pub fn register(&self, ip: IpAddr) -> bool {
        self.registry.register(ip)
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn listener_addrs(&self) -> &[(String, SocketAddr)] {
        &self.listeners
    }

    pub fn listener_addr(&self, name: &str) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|(listener, _)| listener == name)
            .map(|(_, addr)| *addr)
    }

    pub fn signup_addr(&self) -> SocketAddr {
        self.signup_addr
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Balancer task failed during shutdown: {}", e);
            }
        }
        info!("Balancer stopped");
    }
}
