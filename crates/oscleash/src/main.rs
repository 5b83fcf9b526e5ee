// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC Leash CLI
//!
//! # Usage
//!
//! ```bash
//! # config.json next to the executable, random instance name
//! oscleash
//!
//! # Explicit config and name
//! oscleash --config ./leash.json --name Leash-OSC-00001A --log-level debug
//! ```

use clap::Parser;
use oscleash::{
    random_instance_name, ControlSettings, LeashConfig, LeashHandle, SessionManager,
};
use oscquery::{OscQueryService, QueryServiceConfig};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Receive port used in debug mode (avatar emulator default).
const DEBUG_RECEIVE_PORT: u16 = 9001;
/// Send port used in debug mode.
const DEBUG_SEND_PORT: u16 = 9000;

/// OSC Leash - physbone leash locomotion over OSC
#[derive(Parser, Debug)]
#[command(name = "oscleash")]
#[command(about = "Physbone leash locomotion over OSC with OSCQuery discovery")]
#[command(version)]
struct Args {
    /// Configuration file (default: config.json next to the executable)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instance name advertised over mDNS (default: Leash-OSC-<random>)
    #[arg(short, long)]
    name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("config.json")))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = LeashConfig::load_or_create(&config_path)?;
    config.validate()?;
    let ip = config.ip_addr()?;
    let name = args
        .name
        .unwrap_or_else(|| random_instance_name(&mut rand::thread_rng()));

    let mut query_config = QueryServiceConfig::new(name.as_str(), ip);
    query_config.target_prefix = config.target_prefix.clone();
    if config.debug_mode {
        query_config.osc_port = Some(DEBUG_RECEIVE_PORT);
    }

    let service = OscQueryService::bind(query_config).await?;
    let listen_addr = SocketAddr::new(ip, service.osc_port());
    if let Err(e) = UdpSocket::bind(listen_addr) {
        return Err(format!("OSC port {} is already in use: {}", listen_addr, e).into());
    }

    info!("+----------------------------------------------------+");
    info!(
        "|       OSC Leash v{}                              |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Name:     {:39} |", name);
    info!(
        "|  IP:       {:39} |",
        if ip.is_loopback() {
            "localhost".to_string()
        } else {
            ip.to_string()
        }
    );
    info!("|  OSC in:   {:39} |", service.osc_port());
    info!("|  HTTP:     {:39} |", service.http_port());
    info!(
        "|  Run:      {:39} |",
        format!("{:.1}% of stretch", config.run_deadzone * 100.0)
    );
    info!(
        "|  Walk:     {:39} |",
        format!("{:.1}% of stretch", config.walk_deadzone * 100.0)
    );
    info!(
        "|  Delays:   {:39} |",
        format!(
            "{}ms active, {}ms inactive",
            config.active_delay().as_millis(),
            config.inactive_delay().as_millis()
        )
    );
    info!("+----------------------------------------------------+");

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(32);

    let mut sessions = SessionManager::new(
        LeashHandle::new(),
        ControlSettings::from_config(&config),
        config.parameters.addresses(),
        listen_addr,
    )
    .with_parameter_refresh(service.client(), events_tx.clone());

    if config.debug_mode {
        let peer = SocketAddr::new(ip, DEBUG_SEND_PORT);
        info!("Debug mode: sending to {} without discovery", peer);
        sessions.start_session(peer)?;
    }

    let service = service.start(events_tx, shutdown.clone())?;
    let sessions = tokio::spawn(sessions.run(events_rx, shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping...");
    shutdown.cancel();

    sessions.await?;
    service.join().await;

    info!("OSC Leash stopped");
    Ok(())
}
