use std::{
    convert::Infallible,
    net::IpAddr,
    sync::{
        Arc,
        atomic::{AtomicU16, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response, StatusCode, body::Incoming, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpListener, sync::watch};

use ferry_health::{HealthCheck, HealthMonitor, HttpCheck, MonitorSettings, PingCheck};
use ferry_lb::{NodeRegistry, NodeState, RoundRobin};
use ferry_transport::HttpClient;

// status 0 means "accept the request and never answer"
const HANG: u16 = 0;

fn node_a() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn node_b() -> IpAddr {
    "127.0.0.2".parse().unwrap()
}

fn serve(listener: TcpListener, status: Arc<AtomicU16>) {
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => break,
            };
            let status = status.clone();
            let service = service_fn(move |_req: Request<Incoming>| {
                let status = status.load(Ordering::SeqCst);
                async move {
                    let code = if status == HANG {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::from_u16(status).unwrap()
                    };
                    let mut response = Response::new(Full::new(Bytes::from("ok")));
                    *response.status_mut() = code;
                    Ok::<_, Infallible>(response)
                }
            });
            tokio::spawn(async move {
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
}

/// One health endpoint on 127.0.0.1 and one on 127.0.0.2, same port.
async fn start_pair() -> (u16, Arc<AtomicU16>, Arc<AtomicU16>) {
    loop {
        let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = a.local_addr().unwrap().port();
        if let Ok(b) = TcpListener::bind(("127.0.0.2", port)).await {
            let status_a = Arc::new(AtomicU16::new(200));
            let status_b = Arc::new(AtomicU16::new(200));
            serve(a, status_a.clone());
            serve(b, status_b.clone());
            return (port, status_a, status_b);
        }
    }
}

async fn start_single() -> (u16, Arc<AtomicU16>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let status = Arc::new(AtomicU16::new(200));
    serve(listener, status.clone());
    (port, status)
}

fn http_check(port: u16) -> HealthCheck {
    HealthCheck::Http(HttpCheck::new(HttpClient::new(), port, "/health"))
}

fn settings(remove_timeout: Duration) -> MonitorSettings {
    MonitorSettings {
        interval: Duration::from_millis(50),
        request_timeout: Duration::from_millis(300),
        remove_timeout,
    }
}

#[tokio::test]
async fn http_check_verdicts() {
    let (port, status) = start_single().await;
    let check = http_check(port);
    let timeout = Duration::from_millis(300);

    assert!(check.check(node_a(), timeout).await.healthy);

    status.store(500, Ordering::SeqCst);
    let outcome = check.check(node_a(), timeout).await;
    assert!(!outcome.healthy);
    assert!(outcome.detail.contains("500"));

    // any non-200 is a failure, even other 2xx codes
    status.store(204, Ordering::SeqCst);
    assert!(!check.check(node_a(), timeout).await.healthy);

    status.store(HANG, Ordering::SeqCst);
    let start = Instant::now();
    assert!(!check.check(node_a(), timeout).await.healthy);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn http_check_connection_refused_is_unhealthy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let outcome = http_check(port)
        .check(node_a(), Duration::from_millis(300))
        .await;
    assert!(!outcome.healthy);
}

#[tokio::test]
#[ignore = "needs a network where TEST-NET-1 is unreachable"]
async fn ping_without_replies_is_unhealthy() {
    // without ICMP privileges the socket fails, which is unhealthy too
    let check = HealthCheck::Ping(PingCheck::new(3, Duration::from_millis(50)));
    let start = Instant::now();
    let outcome = check
        .check("192.0.2.1".parse().unwrap(), Duration::from_millis(300))
        .await;

    assert!(!outcome.healthy);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn sweep_marks_nodes() {
    let (port, _status) = start_single().await;
    let registry = NodeRegistry::new();
    registry.register(node_a());
    // nothing listens on 127.0.0.2 at this port
    registry.register(node_b());

    let monitor = HealthMonitor::new(
        registry.clone(),
        http_check(port),
        settings(Duration::from_secs(60)),
    );
    let report = monitor.sweep().await;

    assert_eq!(report.checked, 2);
    assert_eq!(report.healthy, 1);
    assert_eq!(report.unhealthy, 1);
    assert!(report.evicted.is_empty());
    assert_eq!(registry.snapshot_healthy(), vec![node_a()]);
    assert_eq!(registry.node(node_b()).unwrap().state(), NodeState::Unhealthy);
}

#[tokio::test]
async fn round_robin_follows_health() {
    let (port, status_a, _status_b) = start_pair().await;
    let registry = NodeRegistry::new();
    registry.register(node_a());
    registry.register(node_b());

    let monitor = HealthMonitor::new(
        registry.clone(),
        http_check(port),
        settings(Duration::from_secs(60)),
    );
    monitor.sweep().await;

    let mut rr = RoundRobin::new();
    let picks: Vec<IpAddr> = (0..4).map(|_| rr.pick(&registry).unwrap()).collect();
    assert_eq!(picks, vec![node_a(), node_b(), node_a(), node_b()]);

    status_a.store(500, Ordering::SeqCst);
    monitor.sweep().await;
    for _ in 0..5 {
        assert_eq!(rr.pick(&registry).unwrap(), node_b());
    }

    status_a.store(200, Ordering::SeqCst);
    monitor.sweep().await;
    let picks: Vec<IpAddr> = (0..2).map(|_| rr.pick(&registry).unwrap()).collect();
    assert!(picks.contains(&node_a()));
    assert!(picks.contains(&node_b()));
}

#[tokio::test]
async fn hung_probe_does_not_delay_other_nodes() {
    let (port, status_a, _status_b) = start_pair().await;
    status_a.store(HANG, Ordering::SeqCst);

    let registry = NodeRegistry::new();
    registry.register(node_a());
    registry.register(node_b());

    let monitor = HealthMonitor::new(
        registry.clone(),
        http_check(port),
        settings(Duration::from_secs(60)),
    );
    let start = Instant::now();
    let report = monitor.sweep().await;

    // both probes run side by side, bounded by the request timeout
    assert!(start.elapsed() < Duration::from_millis(1500));
    assert_eq!(report.healthy, 1);
    assert_eq!(registry.snapshot_healthy(), vec![node_b()]);
}

#[tokio::test]
async fn sweep_evicts_after_remove_timeout() {
    let (port, status) = start_single().await;
    let registry = NodeRegistry::new();
    registry.register(node_a());

    let monitor = HealthMonitor::new(
        registry.clone(),
        http_check(port),
        settings(Duration::from_millis(300)),
    );
    monitor.sweep().await;
    assert_eq!(registry.node(node_a()).unwrap().state(), NodeState::Healthy);

    status.store(500, Ordering::SeqCst);
    let report = monitor.sweep().await;
    assert!(report.evicted.is_empty());
    assert_eq!(registry.node(node_a()).unwrap().state(), NodeState::Unhealthy);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let report = monitor.sweep().await;
    assert_eq!(report.evicted, vec![node_a()]);
    assert!(registry.is_empty());

    // a later signup brings it back as a fresh node
    assert!(registry.register(node_a()));
    let node = registry.node(node_a()).unwrap();
    assert_eq!(node.state(), NodeState::Unknown);
    assert_eq!(node.consecutive_failures(), 0);
}

#[tokio::test]
async fn run_loop_checks_and_stops() {
    let (port, _status) = start_single().await;
    let registry = NodeRegistry::new();
    registry.register(node_a());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = HealthMonitor::new(
        registry.clone(),
        http_check(port),
        settings(Duration::from_secs(60)),
    );
    let handle = monitor.spawn(shutdown_rx);

    let deadline = Instant::now() + Duration::from_secs(3);
    while registry.snapshot_healthy().is_empty() {
        assert!(Instant::now() < deadline, "node never became healthy");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // nodes registered while running are picked up by the next sweep
    registry.register(node_b());
    let deadline = Instant::now() + Duration::from_secs(3);
    while registry.node(node_b()).unwrap().state() == NodeState::Unknown {
        assert!(Instant::now() < deadline, "new node never checked");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("monitor did not stop")
        .unwrap();
}

#[tokio::test]
async fn run_loop_evicts_within_remove_timeout_plus_interval() {
    let (port, status) = start_single().await;
    let registry = NodeRegistry::new();
    registry.register(node_a());

    let settings = settings(Duration::from_millis(300));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = HealthMonitor::new(registry.clone(), http_check(port), settings);
    let handle = monitor.spawn(shutdown_rx);

    let deadline = Instant::now() + Duration::from_secs(3);
    while registry.snapshot_healthy().is_empty() {
        assert!(Instant::now() < deadline, "node never became healthy");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    status.store(500, Ordering::SeqCst);
    let deadline = Instant::now() + Duration::from_secs(3);
    while registry.node(node_a()).unwrap().state() != NodeState::Unhealthy {
        assert!(Instant::now() < deadline, "node never failed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let last_pass = registry.node(node_a()).unwrap().last_healthy_at();

    let deadline = Instant::now() + Duration::from_secs(3);
    while registry.contains(node_a()) {
        assert!(Instant::now() < deadline, "node never evicted");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let gap = last_pass.elapsed();

    // one sweep of slack for probe time and scheduling
    let bound = settings.remove_timeout + settings.interval + Duration::from_millis(150);
    assert!(gap > settings.remove_timeout, "evicted early after {gap:?}");
    assert!(gap <= bound, "evicted after {gap:?}, bound {bound:?}");

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
