use std::{
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};

use ferry_config::config::HealthCheck as HealthCheckConfig;
use ferry_transport::HttpClient;
use http::StatusCode;
use log::debug;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence};
use tokio::task::JoinSet;

const PING_PAYLOAD: [u8; 56] = [0; 56];

/// Result of probing one node once.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub healthy: bool,
    pub latency: Duration,
    pub detail: String,
}

impl CheckOutcome {
    fn passed(latency: Duration, detail: impl Into<String>) -> Self {
        Self {
            healthy: true,
            latency,
            detail: detail.into(),
        }
    }

    fn failed(latency: Duration, detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency,
            detail: detail.into(),
        }
    }
}

pub enum HealthCheck {
    Ping(PingCheck),
    Http(HttpCheck),
}

impl HealthCheck {
    pub fn from_config(config: &HealthCheckConfig) -> Result<Self, String> {
        let strategy = config.strategy.trim().to_lowercase();
        match strategy.as_str() {
            "ping" => Ok(Self::Ping(PingCheck::new(
                config.ping_count,
                Duration::from_millis(config.ping_interval_ms),
            ))),
            "http" => Ok(Self::Http(HttpCheck::new(
                HttpClient::new(),
                config.port,
                config.path.clone(),
            ))),
            _ => Err(format!(
                "unsupported health check strategy: {}",
                config.strategy
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HealthCheck::Ping(_) => "ping",
            HealthCheck::Http(_) => "http",
        }
    }

    /// Probes `ip` until `timeout` has elapsed. Never fails: every error is
    /// folded into an unhealthy outcome.
    pub async fn check(&self, ip: IpAddr, timeout: Duration) -> CheckOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        match self {
            // the ping loop stops at the deadline itself, so replies already
            // counted always reach a verdict
            HealthCheck::Ping(ping) => ping.check(ip, deadline).await,
            HealthCheck::Http(http) => {
                let start = Instant::now();
                match tokio::time::timeout_at(deadline, http.check(ip, timeout)).await {
                    Ok(outcome) => outcome,
                    Err(_) => CheckOutcome::failed(start.elapsed(), "timed out"),
                }
            }
        }
    }
}

/// ICMP echo probe: `count` echoes sent at a fixed interval, healthy when
/// more than one is answered before the deadline.
pub struct PingCheck {
    count: u16,
    interval: Duration,
}

impl PingCheck {
    pub fn new(count: u16, interval: Duration) -> Self {
        Self {
            count: count.max(1),
            interval,
        }
    }

    /// Send offsets of each echo relative to the start of the check. Echoes
    /// that would leave at or after `budget` are never sent.
    fn schedule(&self, budget: Duration) -> Vec<Duration> {
        (0..self.count)
            .map(|seq| self.interval * u32::from(seq))
            .take_while(|offset| *offset < budget)
            .collect()
    }

    pub async fn check(&self, ip: IpAddr, deadline: tokio::time::Instant) -> CheckOutcome {
        let start = tokio::time::Instant::now();
        let config = match ip {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };

        // raw/dgram icmp sockets may need privileges; that is a failed check
        let client = match Client::new(&config) {
            Ok(client) => client,
            Err(e) => {
                debug!("Cannot open ICMP socket for {}: {}", ip, e);
                return CheckOutcome::failed(start.elapsed(), format!("icmp socket: {e}"));
            }
        };

        // every echo leaves on its own schedule, whatever happened to the
        // ones before it
        let ident: u16 = rand::random();
        let budget = deadline.saturating_duration_since(start);
        let mut echoes = JoinSet::new();
        for (seq, offset) in (0..self.count).zip(self.schedule(budget)) {
            let client = client.clone();
            echoes.spawn(async move {
                tokio::time::sleep_until(start + offset).await;
                let mut pinger = client.pinger(ip, PingIdentifier(ident)).await;
                pinger.timeout(deadline.saturating_duration_since(tokio::time::Instant::now()));
                pinger.ping(PingSequence(seq), &PING_PAYLOAD).await
            });
        }

        let mut rtts = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, echoes.join_next()).await {
                Ok(Some(Ok(Ok((_packet, rtt))))) => rtts.push(rtt),
                Ok(Some(Ok(Err(e)))) => debug!("Ping {} failed: {}", ip, e),
                Ok(Some(Err(e))) => debug!("Ping task for {} failed: {}", ip, e),
                Ok(None) | Err(_) => break,
            }
        }

        // echoes still in flight are aborted with the set
        ping_verdict(&rtts, self.count, start.elapsed())
    }
}

/// A single reply is not enough to call a node healthy.
fn ping_verdict(rtts: &[Duration], count: u16, elapsed: Duration) -> CheckOutcome {
    let detail = format!("{}/{} echo replies", rtts.len(), count);
    if rtts.len() > 1 {
        let total: Duration = rtts.iter().sum();
        CheckOutcome::passed(total / rtts.len() as u32, detail)
    } else {
        CheckOutcome::failed(elapsed, detail)
    }
}

/// `GET http://<node>:<port><path>`; only a 200 counts as healthy.
pub struct HttpCheck {
    client: HttpClient,
    port: u16,
    path: String,
}

impl HttpCheck {
    pub fn new(client: HttpClient, port: u16, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self { client, port, path }
    }

    pub fn uri(&self, ip: IpAddr) -> String {
        format!("http://{}{}", SocketAddr::new(ip, self.port), self.path)
    }

    pub async fn check(&self, ip: IpAddr, timeout: Duration) -> CheckOutcome {
        let start = Instant::now();
        let uri = self.uri(ip);
        match self.client.get(&uri, timeout).await {
            Ok(response) if response.status == StatusCode::OK => {
                CheckOutcome::passed(start.elapsed(), response.status.to_string())
            }
            Ok(response) => {
                debug!("Health probe {} returned {}", uri, response.status);
                CheckOutcome::failed(start.elapsed(), response.status.to_string())
            }
            Err(e) => {
                debug!("Health probe {} failed: {}", uri, e);
                CheckOutcome::failed(start.elapsed(), e.to_string())
            }
        }
    }
}
