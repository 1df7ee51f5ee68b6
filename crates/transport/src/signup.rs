//! Client side of node registration.
//!
//! A backend node announces itself to the balancer by posting its address
//! to `/signup`. The balancer answers with [`SIGNUP_SUCCESS_BODY`]; anything
//! else means the node was not added.

use std::{net::IpAddr, time::Duration};

use http::StatusCode;
use log::info;

use crate::http_client::{ClientError, HttpClient};

pub const SIGNUP_PATH: &str = "/signup";

// wire-compatible with existing nodes, spelling included
pub const SIGNUP_SUCCESS_BODY: &str = "succesfully added";

#[derive(Debug)]
pub enum SignupError {
    Transport(ClientError),
    Status(StatusCode, String),
    UnexpectedBody(String),
}

impl std::fmt::Display for SignupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignupError::Transport(err) => write!(f, "signup request failed: {err}"),
            SignupError::Status(status, body) => {
                write!(f, "signup rejected with {status}: {body}")
            }
            SignupError::UnexpectedBody(body) => {
                write!(f, "unexpected signup response: {body:?}")
            }
        }
    }
}

impl std::error::Error for SignupError {}

/// Registers `ip` with the balancer at `base_url` (e.g. `http://10.0.0.1:8000`).
pub async fn signup(
    client: &HttpClient,
    base_url: &str,
    ip: IpAddr,
    timeout: Duration,
) -> Result<(), SignupError> {
    let uri = format!("{}{}", base_url.trim_end_matches('/'), SIGNUP_PATH);
    let response = client
        .post(&uri, ip.to_string(), timeout)
        .await
        .map_err(SignupError::Transport)?;

    let body = String::from_utf8_lossy(&response.body).to_string();
    if response.status != StatusCode::OK {
        return Err(SignupError::Status(response.status, body));
    }
    if body.trim() != SIGNUP_SUCCESS_BODY {
        return Err(SignupError::UnexpectedBody(body));
    }

    info!("Signed up {} with {}", ip, base_url);
    Ok(())
}
