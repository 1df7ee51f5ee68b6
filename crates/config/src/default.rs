use crate::config::{HealthCheck, Log, Signup};

// default values
pub fn get_default_strategy() -> String {
    String::from("http")
}

pub fn get_default_health_port() -> u16 {
    8080
}

pub fn get_default_path() -> String {
    String::from("/health")
}

pub fn get_default_interval() -> u64 {
    5000
}

pub fn get_default_health_timeout() -> u64 {
    1000
}

pub fn get_default_remove_timeout() -> u64 {
    30_000
}

pub fn get_default_ping_count() -> u16 {
    3
}

pub fn get_default_ping_interval() -> u64 {
    100
}

pub fn get_default_session_idle_timeout() -> u64 {
    60_000
}

pub fn get_default_signup_address() -> String {
    String::from("0.0.0.0:8000")
}

pub fn get_default_log_level() -> String {
    String::from("info")
}

pub fn get_default_health_check() -> HealthCheck {
    HealthCheck {
        strategy: get_default_strategy(),
        port: get_default_health_port(),
        path: get_default_path(),
        interval_ms: get_default_interval(),
        timeout_ms: get_default_health_timeout(),
        remove_timeout_ms: get_default_remove_timeout(),
        ping_count: get_default_ping_count(),
        ping_interval_ms: get_default_ping_interval(),
    }
}

pub fn get_default_signup() -> Signup {
    Signup {
        address: get_default_signup_address(),
    }
}

pub fn get_default_log() -> Log {
    Log {
        level: get_default_log_level(),
    }
}
