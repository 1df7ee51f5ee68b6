use std::{
    collections::HashSet,
    net::{IpAddr, SocketAddr},
};

use crate::config::Config;
use log::{error, info};

pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

pub const VALID_STRATEGIES: &[&str] = &["http", "ping"];

pub fn validate(config: &Config) -> bool {
    info!("Starting configuration validation...");

    // --- Validate log level ---
    if !VALID_LOG_LEVELS
        .iter()
        .any(|lvl| lvl.eq_ignore_ascii_case(&config.log.level))
    {
        error!("Invalid log level: {}", config.log.level);
        return false;
    }

    // --- Validate health check ---
    let health = &config.health_check;
    if !VALID_STRATEGIES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(&health.strategy))
    {
        error!("Invalid health check strategy: {}", health.strategy);
        return false;
    }

    if health.strategy.eq_ignore_ascii_case("http") {
        if health.port == 0 {
            error!("Health check port is invalid (0)");
            return false;
        }

        if !health.path.starts_with('/') {
            error!("Health check path must start with '/': {}", health.path);
            return false;
        }
    }

    if health.interval_ms == 0 {
        error!("Health check interval is invalid (0)");
        return false;
    }

    if health.timeout_ms == 0 {
        error!("Health check timeout is invalid (0)");
        return false;
    }

    if health.remove_timeout_ms == 0 {
        error!("Health check remove timeout is invalid (0)");
        return false;
    }

    // a ping verdict needs more than one reply
    if health.strategy.eq_ignore_ascii_case("ping") && health.ping_count < 2 {
        error!(
            "Ping count is invalid ({}), at least 2 probes are required",
            health.ping_count
        );
        return false;
    }

    // --- Validate listeners ---
    if config.listeners.is_empty() {
        error!("No listeners configured");
        return false;
    }

    let mut names = HashSet::new();
    for listener in &config.listeners {
        if listener.name.is_empty() {
            error!("Listener name is missing");
            return false;
        }

        if !names.insert(listener.name.as_str()) {
            error!("Duplicate listener name '{}'", listener.name);
            return false;
        }

        if listener.address.parse::<SocketAddr>().is_err() {
            error!(
                "Invalid listen address '{}' for listener '{}'",
                listener.address, listener.name
            );
            return false;
        }

        if listener.backend_port == 0 {
            error!(
                "Backend port is invalid (0) for listener '{}'",
                listener.name
            );
            return false;
        }

        if listener.session_idle_timeout_ms == 0 {
            error!(
                "Session idle timeout is invalid (0) for listener '{}'",
                listener.name
            );
            return false;
        }
    }

    // --- Validate signup endpoint ---
    if config.signup.address.parse::<SocketAddr>().is_err() {
        error!("Invalid signup address: {}", config.signup.address);
        return false;
    }

    // --- Validate static nodes ---
    for node in &config.nodes {
        if node.parse::<IpAddr>().is_err() {
            error!("Invalid node address: {}", node);
            return false;
        }
    }

    info!("Configuration validation passed successfully");

    true
}
