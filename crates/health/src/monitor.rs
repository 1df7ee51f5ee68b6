//! Periodic sweep over the node registry.

use std::{collections::HashSet, net::IpAddr, sync::Arc, time::Duration};

use ferry_config::config::HealthCheck as HealthCheckConfig;
use ferry_lb::{HealthTransition, NodeRegistry};
use log::{debug, error, info, warn};
use tokio::{
    sync::watch,
    task::{JoinHandle, JoinSet},
    time::MissedTickBehavior,
};

use crate::checker::HealthCheck;

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Time between the start of two sweeps.
    pub interval: Duration,
    /// Budget for a single probe.
    pub request_timeout: Duration,
    /// How long a node may go without a passing check before eviction.
    pub remove_timeout: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &HealthCheckConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms.max(1)),
            request_timeout: Duration::from_millis(config.timeout_ms.max(1)),
            remove_timeout: Duration::from_millis(config.remove_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub evicted: Vec<IpAddr>,
}

pub struct HealthMonitor {
    registry: NodeRegistry,
    check: Arc<HealthCheck>,
    settings: MonitorSettings,
}

impl HealthMonitor {
    pub fn new(registry: NodeRegistry, check: HealthCheck, settings: MonitorSettings) -> Self {
        Self {
            registry,
            check: Arc::new(check),
            settings,
        }
    }

    /// Checks every registered node once, concurrently, then evicts nodes
    /// past the remove timeout.
    pub async fn sweep(&self) -> SweepReport {
        let nodes = self.registry.nodes();
        let mut report = SweepReport {
            checked: nodes.len(),
            ..SweepReport::default()
        };

        let mut pending: HashSet<IpAddr> = nodes.iter().copied().collect();
        let mut probes = JoinSet::new();
        for ip in nodes {
            let check = self.check.clone();
            let timeout = self.settings.request_timeout;
            probes.spawn(async move { (ip, check.check(ip, timeout).await) });
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((ip, outcome)) => {
                    pending.remove(&ip);
                    debug!(
                        "Health check {} {}: {} ({:?})",
                        self.check.name(),
                        ip,
                        outcome.detail,
                        outcome.latency
                    );
                    self.apply(ip, outcome.healthy, &mut report);
                }
                Err(e) => error!("Health probe task failed: {}", e),
            }
        }

        // probes that died without a verdict count as failures
        for ip in pending {
            self.apply(ip, false, &mut report);
        }

        report.evicted = self.registry.evict_expired(self.settings.remove_timeout);
        for ip in &report.evicted {
            warn!(
                "Evicted node {}: no passing health check for over {:?}",
                ip, self.settings.remove_timeout
            );
        }

        report
    }

    fn apply(&self, ip: IpAddr, healthy: bool, report: &mut SweepReport) {
        if healthy {
            report.healthy += 1;
        } else {
            report.unhealthy += 1;
        }

        if let Some(transition) = self.registry.record_verdict(ip, healthy) {
            log_health_transition(ip, transition);
        }
    }

    /// Sweeps on every tick until `shutdown` changes or its sender is
    /// dropped. A sweep always finishes before the next one starts.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Health monitor started ({} every {:?}, timeout {:?}, remove after {:?})",
            self.check.name(),
            self.settings.interval,
            self.settings.request_timeout,
            self.settings.remove_timeout
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    debug!(
                        "Sweep done: {} checked, {} healthy, {} unhealthy, {} evicted",
                        report.checked,
                        report.healthy,
                        report.unhealthy,
                        report.evicted.len()
                    );
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Health monitor stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

fn log_health_transition(ip: IpAddr, transition: HealthTransition) {
    match transition {
        HealthTransition::BecameHealthy => {
            info!("Backend {} became healthy", ip);
        }
        HealthTransition::BecameUnhealthy => {
            error!("Backend {} became unhealthy", ip);
        }
    }
}
