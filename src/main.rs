use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sendmammy_relay::config::Config;
use sendmammy_relay::processor::CannedReplyProcessor;
use sendmammy_relay::{server, EventDispatcher, HttpAuthGateway, MessageSender};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sendmammy_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; without a file, fall back to the environment
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if config_path.exists() {
        info!("Loading configuration from: {}", config_path.display());
        Config::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        info!(
            "No config file at {}, using environment only",
            config_path.display()
        );
        Config::from_env().context("Failed to load config from environment")?
    };

    info!("Configuration loaded successfully");
    info!("  Auth service: {}", config.auth.service_url);
    info!("  SendMammy: {}", config.sendmammy.base_url);
    info!(
        "  Retry: {} attempts, {} ms apart",
        config.sendmammy.max_attempts, config.sendmammy.retry_delay_ms
    );
    info!("  Canned replies: {}", config.responder.replies.len());

    // Process-scoped state: built once, shared by every webhook invocation
    let gateway = Arc::new(HttpAuthGateway::new(
        config.auth.refresh_token.clone(),
        config.auth.service_url.clone(),
    ));
    let sender = Arc::new(MessageSender::from_config(&config.sendmammy)?);
    let processor = Arc::new(CannedReplyProcessor::new(config.responder.replies.clone()));
    let dispatcher = Arc::new(EventDispatcher::new(
        gateway,
        sender,
        processor,
        config.responder.clone(),
    ));

    server::serve(dispatcher, &config.server).await
}
