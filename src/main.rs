use anyhow::Result;
use serde_json::Value;
use tracing::{error, info};

use shardbot::{Activity, BotConfig, Client, EventContext, Presence};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("shardbot=info")),
        )
        .init();

    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to get config from environment");
            std::process::exit(1);
        }
    };

    let client = Client::new(config);
    client.events().add_event("ready", on_ready).await;

    info!(shards = client.shard_count(), "Starting bot...");
    tokio::select! {
        result = client.run() => {
            if let Err(e) = result {
                error!(error = %e, "Client error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping bot...");
        }
    }

    client.close().await?;
    info!("Bot has shut down cleanly");
    Ok(())
}

async fn on_ready(ctx: EventContext, payload: Value) -> Result<()> {
    let user = payload["user"]["username"].as_str().unwrap_or("unknown");
    let guilds = payload["guilds"].as_array().map_or(0, Vec::len);
    info!(shard_id = ctx.shard_id, user, guilds, "Bot is ready!");

    ctx.change_status(Presence { activity: Some(Activity::playing("shardbot")), ..Default::default() })
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
