//! In-memory persistence backend.
//!
//! Speaks the savesync wire protocol and keeps every save record in memory,
//! last write wins. Useful for running the game demo locally:
//!
//!   cargo run -p savesync-demo-backend -- --port 8090
//!   cargo run -p savesync-demo-game -- --backend ws://127.0.0.1:8090/save --player 76561198000000001
//!
//! `--latency-ms` delays every load response, which makes client timeouts
//! easy to observe.

mod server;
mod store;

use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("savesync_backend=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_arg(&args, "--port").unwrap_or(8090);
    let latency = Duration::from_millis(parse_arg(&args, "--latency-ms").unwrap_or(0));

    tracing::info!("Starting persistence backend on port {}", port);

    server::run(port, latency).await
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
