//! Ferry UDP load balancer - main entry point

use clap::Parser;
use log::{error, info};

use ferry_config::validator::validate as validate_config;
use ferry_edge::Balancer;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    // Sets a custom config file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .unwrap_or_else(|| "./config/config.yaml".to_string());

    let config = match ferry_config::loader::read_config(&config_path) {
        Ok(cfg) => cfg,
        Err(err_msg) => {
            eprintln!("Error loading config: {}", err_msg);
            std::process::exit(1);
        }
    };

    ferry_utils::logger::init_logger(&config.log.level);

    if !validate_config(&config) {
        error!("Configuration validation failed. Exiting...");
        std::process::exit(1);
    }

    info!("Ferry is starting");
    let running = match Balancer::new(config).start().await {
        Ok(running) => running,
        Err(err) => {
            error!("Failed to start: {}", err);
            std::process::exit(1);
        }
    };

    for (name, addr) in running.listener_addrs() {
        info!("Listener '{}' ready on {}", name, addr);
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for shutdown signal: {}", err);
    }

    info!("Shutting down");
    running.shutdown().await;
}
