use std::{
    collections::BTreeMap,
    net::IpAddr,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, Instant},
};

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    // registered, no verdict yet; not selectable
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    BecameHealthy,
    BecameUnhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LbError {
    NoHealthyBackend,
}

impl std::fmt::Display for LbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LbError::NoHealthyBackend => write!(f, "no healthy backend available"),
        }
    }
}

impl std::error::Error for LbError {}

#[derive(Debug, Clone)]
pub struct Node {
    state: NodeState,
    consecutive_failures: u32,
    last_healthy_at: Instant,
    registered_at: Instant,
    connections: usize,
}

impl Node {
    fn new(now: Instant) -> Self {
        Self {
            state: NodeState::Unknown,
            consecutive_failures: 0,
            // a node that never passes is evicted relative to its registration
            last_healthy_at: now,
            registered_at: now,
            connections: 0,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.state, NodeState::Healthy)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_healthy_at(&self) -> Instant {
        self.last_healthy_at
    }

    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    pub fn connections(&self) -> usize {
        self.connections
    }

    fn record_success(&mut self, now: Instant) -> Option<HealthTransition> {
        self.consecutive_failures = 0;
        self.last_healthy_at = now;
        match self.state {
            NodeState::Healthy => None,
            NodeState::Unknown | NodeState::Unhealthy => {
                self.state = NodeState::Healthy;
                Some(HealthTransition::BecameHealthy)
            }
        }
    }

    fn record_failure(&mut self) -> Option<HealthTransition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            NodeState::Unhealthy => None,
            NodeState::Unknown | NodeState::Healthy => {
                self.state = NodeState::Unhealthy;
                Some(HealthTransition::BecameUnhealthy)
            }
        }
    }

    fn is_expired(&self, now: Instant, remove_timeout: Duration) -> bool {
        !self.is_healthy() && now.saturating_duration_since(self.last_healthy_at) > remove_timeout
    }
}

/// Shared view of every registered backend node, keyed by address.
///
/// Clones share the same underlying map. Every accessor copies what it
/// returns, so callers never hold the lock while iterating.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<BTreeMap<IpAddr, Node>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<IpAddr, Node>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<IpAddr, Node>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `ip` in the `Unknown` state. Returns `false` if it was already
    /// registered, in which case its state is left untouched.
    pub fn register(&self, ip: IpAddr) -> bool {
        self.register_at(ip, Instant::now())
    }

    pub fn register_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut nodes = self.write();
        if nodes.contains_key(&ip) {
            return false;
        }
        nodes.insert(ip, Node::new(now));
        debug!("Registered node {}", ip);
        true
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.read().contains_key(&ip)
    }

    pub fn node(&self, ip: IpAddr) -> Option<Node> {
        self.read().get(&ip).cloned()
    }

    /// All registered addresses, healthy or not.
    pub fn nodes(&self) -> Vec<IpAddr> {
        self.read().keys().copied().collect()
    }

    pub fn entries(&self) -> Vec<(IpAddr, Node)> {
        self.read()
            .iter()
            .map(|(ip, node)| (*ip, node.clone()))
            .collect()
    }

    /// Point-in-time copy of the selectable addresses, in address order.
    pub fn snapshot_healthy(&self) -> Vec<IpAddr> {
        self.read()
            .iter()
            .filter_map(|(ip, node)| node.is_healthy().then_some(*ip))
            .collect()
    }

    pub fn record_verdict(&self, ip: IpAddr, healthy: bool) -> Option<HealthTransition> {
        self.record_verdict_at(ip, healthy, Instant::now())
    }

    /// Applies one check result. Verdicts for nodes that are no longer
    /// registered are dropped.
    pub fn record_verdict_at(
        &self,
        ip: IpAddr,
        healthy: bool,
        now: Instant,
    ) -> Option<HealthTransition> {
        let mut nodes = self.write();
        let node = nodes.get_mut(&ip)?;
        if healthy {
            node.record_success(now)
        } else {
            node.record_failure()
        }
    }

    pub fn evict(&self, ip: IpAddr) -> bool {
        self.write().remove(&ip).is_some()
    }

    pub fn evict_expired(&self, remove_timeout: Duration) -> Vec<IpAddr> {
        self.evict_expired_at(remove_timeout, Instant::now())
    }

    /// Removes every node whose last passing check is older than
    /// `remove_timeout` and returns the evicted addresses.
    pub fn evict_expired_at(&self, remove_timeout: Duration, now: Instant) -> Vec<IpAddr> {
        let mut nodes = self.write();
        let expired: Vec<IpAddr> = nodes
            .iter()
            .filter_map(|(ip, node)| node.is_expired(now, remove_timeout).then_some(*ip))
            .collect();
        for ip in &expired {
            nodes.remove(ip);
        }
        expired
    }

    pub fn connection_opened(&self, ip: IpAddr) {
        if let Some(node) = self.write().get_mut(&ip) {
            node.connections = node.connections.saturating_add(1);
        }
    }

    pub fn connection_closed(&self, ip: IpAddr) {
        if let Some(node) = self.write().get_mut(&ip) {
            node.connections = node.connections.saturating_sub(1);
        }
    }
}

pub struct RoundRobin {
    next: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn pick(&mut self, registry: &NodeRegistry) -> Result<IpAddr, LbError> {
        let candidates = registry.snapshot_healthy();
        self.pick_from(&candidates)
    }

    /// The cursor is reduced against the length of `candidates` on every
    /// call, so a shrinking healthy set never indexes out of range.
    pub fn pick_from(&mut self, candidates: &[IpAddr]) -> Result<IpAddr, LbError> {
        if candidates.is_empty() {
            return Err(LbError::NoHealthyBackend);
        }

        let ip = candidates[self.next % candidates.len()];
        self.next = self.next.wrapping_add(1);
        Ok(ip)
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}
