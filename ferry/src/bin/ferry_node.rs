use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::{Method, Request, Response, StatusCode, body::Incoming, service::service_fn};
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use tokio::net::{TcpListener, UdpSocket};

use ferry_transport::{HttpClient, signup::signup};

#[derive(Parser)]
#[command(version, about = "Demo backend node for ferry")]
struct Cli {
    /// Balancer signup endpoint, e.g. http://10.0.0.1:8000
    #[arg(long)]
    balancer: String,

    /// Address this node registers under.
    #[arg(long)]
    advertise: IpAddr,

    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(long, default_value_t = 8080)]
    health_port: u16,

    /// UDP ports to echo on; repeat for several services.
    #[arg(long = "udp-port", default_values_t = [5353])]
    udp_ports: Vec<u16>,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, default_value_t = 2000)]
    signup_timeout_ms: u64,
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let mut response = Response::new(Full::new(Bytes::from("ok")));
    if req.method() != Method::GET || req.uri().path() != "/health" {
        *response.status_mut() = StatusCode::NOT_FOUND;
        *response.body_mut() = Full::new(Bytes::from("not found"));
    }
    Ok(response)
}

async fn serve_health(listener: TcpListener) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!("Health accept failed: {}", e);
                continue;
            }
        };
        tokio::spawn(async move {
            let _ = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service_fn(handle_request))
                .await;
        });
    }
}

async fn echo(socket: UdpSocket) {
    let mut buf = vec![0u8; 65_535];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                debug!("Echoing {} bytes to {}", len, from);
                if let Err(e) = socket.send_to(&buf[..len], from).await {
                    warn!("Echo to {} failed: {}", from, e);
                }
            }
            Err(e) => warn!("UDP receive failed: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    ferry_utils::logger::init_logger(&cli.log_level);

    let health = TcpListener::bind(SocketAddr::new(cli.bind, cli.health_port)).await?;
    info!("Health endpoint on http://{}/health", health.local_addr()?);
    tokio::spawn(serve_health(health));

    for port in &cli.udp_ports {
        let socket = UdpSocket::bind(SocketAddr::new(cli.bind, *port)).await?;
        info!("Echoing UDP on {}", socket.local_addr()?);
        tokio::spawn(echo(socket));
    }

    let client = HttpClient::new();
    let timeout = Duration::from_millis(cli.signup_timeout_ms);
    signup(&client, &cli.balancer, cli.advertise, timeout).await?;

    tokio::signal::ctrl_c().await?;
    info!("Node stopped");
    Ok(())
}
