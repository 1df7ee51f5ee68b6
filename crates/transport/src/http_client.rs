use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;

#[derive(Debug)]
pub enum ClientError {
    InvalidRequest(http::Error),
    Send(hyper_util::client::legacy::Error),
    Body(hyper::Error),
    Timeout,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::InvalidRequest(err) => write!(f, "invalid request: {err}"),
            ClientError::Send(err) => write!(f, "send failed: {err}"),
            ClientError::Body(err) => write!(f, "reading body failed: {err}"),
            ClientError::Timeout => write!(f, "request timed out"),
        }
    }
}

impl std::error::Error for ClientError {}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Plain HTTP/1 client shared by health polling and node signup.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpClient {
    pub fn new() -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(true);
        http.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(http);

        Self { client }
    }

    pub async fn get(&self, uri: &str, timeout: Duration) -> Result<HttpResponse, ClientError> {
        self.send(Method::GET, uri, Bytes::new(), timeout).await
    }

    pub async fn post(
        &self,
        uri: &str,
        body: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<HttpResponse, ClientError> {
        self.send(Method::POST, uri, body.into(), timeout).await
    }

    /// Sends one request and buffers the whole response body. `timeout`
    /// covers connect, headers and body.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Bytes,
        timeout: Duration,
    ) -> Result<HttpResponse, ClientError> {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(http::header::USER_AGENT, "ferry/0.1")
            .body(Full::new(body))
            .map_err(ClientError::InvalidRequest)?;

        let exchange = async {
            let response = self.client.request(request).await.map_err(ClientError::Send)?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(ClientError::Body)?
                .to_bytes();
            Ok::<_, ClientError>(HttpResponse { status, body })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
