pub mod http_client;
pub mod signup;

pub use http_client::{ClientError, HttpClient, HttpResponse};
