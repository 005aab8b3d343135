//! Game server demo.
//!
//! Loads one player from the backend, simulates a few ticks of gathering,
//! and saves along the way. Saves made while the backend is down are queued
//! and go out once it comes back.
//!
//!   cargo run -p savesync-demo-backend -- --port 8090
//!   cargo run -p savesync-demo-game -- --player 76561198000000001 --ticks 40
//!
//! Pass `--config savesync.toml` to read the client settings from a file.

mod world;

use savesync_client::{PersistenceClient, SyncConfig};
use savesync_core::PlayerId;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;
use world::{Player, World};

const SAVE_EVERY: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("savesync_game=info".parse()?)
                .add_directive("savesync_client=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = match parse_arg_string(&args, "--config") {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(url) = parse_arg_string(&args, "--backend") {
        config.base_url = url;
    }
    let player_id: PlayerId = parse_arg_string(&args, "--player")
        .unwrap_or_else(|| "76561198000000001".to_string())
        .parse()?;
    let ticks: u64 = parse_arg(&args, "--ticks").unwrap_or(40);
    let tick_interval = config.tick_interval();

    let client = PersistenceClient::new(config)?;
    client.connect(player_id.clone());

    let player = match client.load(&player_id).await {
        Some(snapshot) => {
            tracing::info!(
                %player_id,
                level = snapshot.level,
                money = snapshot.money,
                "loaded saved player"
            );
            Player::from_snapshot(snapshot)
        }
        None => {
            tracing::info!(%player_id, "no save found, starting fresh");
            Player::new(player_id)
        }
    };

    let mut world = World::new(player);
    let mut interval = tokio::time::interval(tick_interval);
    for _ in 0..ticks {
        interval.tick().await;
        world.tick();
        client.tick();

        if world.tick % SAVE_EVERY == 0 {
            client.save_player(&world.player);
        }
    }

    client.save_player(&world.player);
    tracing::info!(
        ticks = world.tick,
        level = world.player.level,
        money = world.player.money,
        "session over"
    );

    // Give the final save and any queued ones a chance to go out.
    for _ in 0..8 {
        interval.tick().await;
        client.tick();
    }

    Ok(())
}

fn parse_arg<T: FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn parse_arg_string(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
