use serde::{Deserialize, Serialize};

use crate::default::{
    get_default_health_check, get_default_health_port, get_default_health_timeout,
    get_default_interval, get_default_log, get_default_log_level, get_default_path,
    get_default_ping_count, get_default_ping_interval, get_default_remove_timeout,
    get_default_session_idle_timeout, get_default_signup, get_default_signup_address,
    get_default_strategy,
};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "get_default_log")]
    pub log: Log,

    #[serde(default = "get_default_health_check")]
    pub health_check: HealthCheck,

    // one entry per forwarded service (dns, metadata api, ...)
    pub listeners: Vec<Listener>,

    #[serde(default = "get_default_signup")]
    pub signup: Signup,

    // node ips registered at startup, in addition to signups
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthCheck {
    #[serde(default = "get_default_strategy")]
    pub strategy: String, // "http" | "ping"

    #[serde(default = "get_default_health_port")]
    pub port: u16, // http strategy only

    #[serde(default = "get_default_path")]
    pub path: String, // "/health"

    #[serde(default = "get_default_interval")]
    pub interval_ms: u64,

    #[serde(default = "get_default_health_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "get_default_remove_timeout")]
    pub remove_timeout_ms: u64,

    #[serde(default = "get_default_ping_count")]
    pub ping_count: u16,

    #[serde(default = "get_default_ping_interval")]
    pub ping_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Listener {
    pub name: String, // "dns"

    pub address: String, // "0.0.0.0:53"

    pub backend_port: u16, // 5353

    #[serde(default = "get_default_session_idle_timeout")]
    pub session_idle_timeout_ms: u64,

    #[serde(default)]
    pub drop_sessions_on_unhealthy: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Signup {
    #[serde(default = "get_default_signup_address")]
    pub address: String, // "0.0.0.0:8000"
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Log {
    #[serde(default = "get_default_log_level")]
    pub level: String, // "trace, debug, info, warn, error, off"
}
