//! HTTP endpoint backend nodes use to join the pool.
//!
//! `POST /signup` registers the address in the request body, or the
//! caller's own address when the body is empty. `GET /nodes` lists the
//! registry for operators.

use std::{
    convert::Infallible,
    fmt::Write as _,
    net::{IpAddr, SocketAddr},
};

use bytes::Bytes;
use ferry_lb::{NodeRegistry, NodeState};
use ferry_transport::signup::{SIGNUP_PATH, SIGNUP_SUCCESS_BODY};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use tokio::{net::TcpListener, sync::watch};

use crate::ProxyError;

const MAX_BODY: usize = 1024;

pub struct SignupServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: NodeRegistry,
}

impl SignupServer {
    pub async fn bind(address: SocketAddr, registry: NodeRegistry) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ProxyError::Bind(address, e))?;
        let local_addr = listener.local_addr().map_err(ProxyError::Socket)?;
        info!("Signup endpoint on http://{}{}", local_addr, SIGNUP_PATH);

        Ok(Self {
            listener,
            local_addr,
            registry,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.changed() => break,
            };

            let (stream, peer) = match accepted {
                Ok(v) => v,
                Err(e) => {
                    warn!("Signup accept failed: {}", e);
                    continue;
                }
            };

            let registry = self.registry.clone();
            let service = service_fn(move |req| handle_request(req, peer, registry.clone()));
            tokio::spawn(async move {
                if let Err(e) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("Signup connection from {} ended: {}", peer, e);
                }
            });
        }

        info!("Signup endpoint stopped");
    }
}

async fn handle_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    registry: NodeRegistry,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::POST, SIGNUP_PATH) => {
            match Limited::new(req.into_body(), MAX_BODY).collect().await {
                Ok(body) => signup(&body.to_bytes(), peer, &registry),
                Err(_) => text(StatusCode::PAYLOAD_TOO_LARGE, "body too large"),
            }
        }
        (_, SIGNUP_PATH) => text(StatusCode::METHOD_NOT_ALLOWED, "use POST"),
        (&Method::GET, "/nodes") => text(StatusCode::OK, list_nodes(&registry)),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

fn signup(body: &[u8], peer: SocketAddr, registry: &NodeRegistry) -> Response<Full<Bytes>> {
    let raw = String::from_utf8_lossy(body);
    let raw = raw.trim();

    let ip = if raw.is_empty() {
        peer.ip()
    } else {
        match raw.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => {
                warn!("Rejected signup from {}: invalid address {:?}", peer, raw);
                return text(StatusCode::BAD_REQUEST, format!("invalid node address: {raw}"));
            }
        }
    };

    if registry.register(ip) {
        info!("Node {} signed up (from {})", ip, peer);
    } else {
        debug!("Node {} signed up again", ip);
    }
    text(StatusCode::OK, SIGNUP_SUCCESS_BODY)
}

fn list_nodes(registry: &NodeRegistry) -> String {
    let mut out = String::new();
    for (ip, node) in registry.entries() {
        let state = match node.state() {
            NodeState::Unknown => "unknown",
            NodeState::Healthy => "healthy",
            NodeState::Unhealthy => "unhealthy",
        };
        let _ = writeln!(out, "{} {} {}", ip, state, node.connections());
    }
    out
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
