//! guildcached - Guild settings cache node
//!
//! Runs a `SettingsCache` against in-process event buses and a seeded
//! fetcher, driven by line commands on stdin:
//!
//! - `get <guild_id>` - read through the cache (fetching on miss)
//! - `has <guild_id>` - check for a live cached entry
//! - `drop <guild_id>` - delete the cached entry
//! - `publish <channel> <json>` - deliver a pub/sub message
//! - `cluster <channel> <json>` - deliver a gateway lifecycle event

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use guildcache::{Config, LocalBus, SettingsCache, StaticFetcher};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("guildcache=info,guildcached=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting guildcached...");

    let config = Config::from_env();
    info!("Cache TTL: {:?}", config.cache.ttl);

    let fetcher = match &config.seed_path {
        Some(path) => StaticFetcher::from_json_file(path)?,
        None => {
            warn!("GUILDCACHE_SEED_PATH not set, every fetch will miss");
            StaticFetcher::new()
        }
    };

    let cache = SettingsCache::with_config(Arc::new(fetcher), &config.cache);
    let cluster = LocalBus::new();
    let pubsub = LocalBus::new();
    let subscriptions = cache.create(&cluster, &pubsub);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Err(e) = run_command(&cache, &cluster, &pubsub, line.trim()).await {
                    warn!("{}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    info!("Shut down");

    Ok(())
}

async fn run_command(
    cache: &SettingsCache,
    cluster: &LocalBus,
    pubsub: &LocalBus,
    line: &str,
) -> anyhow::Result<()> {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let arg = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();

    match command {
        "" => {}
        "get" => {
            let settings = cache.get_or_fetch(arg).await;
            println!("{}", serde_json::to_string(&settings)?);
        }
        "has" => println!("{}", cache.has(arg)),
        "drop" => cache.delete(arg),
        "publish" => {
            let delivered = pubsub.publish(arg, rest.as_bytes());
            info!("Delivered {} to {} handlers", arg, delivered);
        }
        "cluster" => {
            let delivered = cluster.publish(arg, rest.as_bytes());
            info!("Delivered {} to {} handlers", arg, delivered);
        }
        other => anyhow::bail!("unknown command: {}", other),
    }

    Ok(())
}
