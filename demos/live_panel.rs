//! Watch live stats for a handful of servers.
//!
//! Requires in `.env` (or the environment):
//! - `PANEL_URL`: panel base URL, e.g. `https://panel.example.com`
//! - `PANEL_API_KEY`: API key of a user with access to the servers
//! - `SERVER_UUIDS`: comma-separated server UUIDs
//!
//! Run: cargo run --example live_panel --features native

use std::env;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use featherpanel_live::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,featherpanel_live=debug")),
        )
        .init();

    let panel_url = env::var("PANEL_URL")?;
    let api_key = env::var("PANEL_API_KEY")?;
    let servers: Vec<String> = env::var("SERVER_UUIDS")?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if servers.is_empty() {
        return Err("SERVER_UUIDS lists no servers".into());
    }

    let provider = HttpTokenProvider::new(&panel_url)?
        .with_retry(RetryPolicy::Idempotent)
        .with_api_key(api_key)
        .await;
    let live = LiveManager::new(Arc::new(provider), Arc::new(NativeConnector::new()));

    for (server, result) in live.connect_many(servers.clone()).await {
        match result {
            Ok(()) => println!("{server}: connected"),
            Err(e) => println!("{server}: {e} (retrying in background)"),
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for server in &servers {
                    print_server(&live, server);
                }
                println!();
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    live.disconnect_all();
    println!("Disconnected.");
    Ok(())
}

fn print_server(live: &LiveManager, server: &str) {
    let Some(snap) = live.snapshot(server) else {
        return;
    };
    let status = live.server_status(server).unwrap_or_else(|| "-".into());
    match live.server_stats(server) {
        Some(stats) => println!(
            "{server} [{} / {:?}] {status}: cpu {}%, mem {} / {} MiB, net rx {} tx {}",
            snap.status,
            snap.health,
            stats.cpu_usage,
            stats.memory_bytes / (1 << 20),
            stats.memory_limit_bytes / (1 << 20),
            stats.network_rx,
            stats.network_tx,
        ),
        None => println!(
            "{server} [{} / {:?}] {status}: no stats yet (reconnects: {})",
            snap.status, snap.health, snap.reconnect_attempts
        ),
    }
}
