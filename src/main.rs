use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use events_notifier::config::AppCfg;
use events_notifier::contract_resolver::HttpContractInterfaceResolver;
use events_notifier::endpoint::ConfigEndpointResolver;
use events_notifier::engine::SubscriptionEngine;
use events_notifier::node::WsNodeConnector;
use events_notifier::repository::{
    InMemorySubscriptionRepository, PgSubscriptionRepository, SubscriptionRepository, DEFAULT_SCHEMA,
};
use events_notifier::sender::WebhookSender;
use events_notifier::service::SubscriptionService;
use events_notifier::web_api::{self, AppState};

async fn open_repository(cfg: &AppCfg) -> anyhow::Result<Arc<dyn SubscriptionRepository>> {
    let Some(pg) = &cfg.postgres else {
        warn!("No postgres section configured, subscriptions are kept in memory only");
        return Ok(Arc::new(InMemorySubscriptionRepository::new()));
    };

    let db_schema = match &pg.schema {
        Some(path) => std::fs::read_to_string(Path::new(path))
            .map_err(|e| anyhow::anyhow!("Failed to read database schema from {}: {}", path, e))?,
        None => DEFAULT_SCHEMA.to_string(),
    };

    Ok(Arc::new(PgSubscriptionRepository::connect(&pg.dsn, &db_schema).await?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();

    let cfg_path = std::env::args().nth(1).unwrap_or_else(|| "./config.yaml".to_string());
    let cfg = AppCfg::load(&cfg_path)?;
    info!("Starting {} with {} configured networks", cfg.get_name(), cfg.networks.len());

    // deps
    let repository = open_repository(&cfg).await?;
    let endpoints = Arc::new(ConfigEndpointResolver::new(cfg.endpoints()));
    let abi_resolver = Arc::new(HttpContractInterfaceResolver::new(cfg.delivery_timeout())?);
    let sender = Arc::new(WebhookSender::new(cfg.delivery_timeout())?);
    let connector = Arc::new(WsNodeConnector::new(cfg.connect_timeout()));

    let engine = Arc::new(SubscriptionEngine::new(
        Arc::clone(&repository),
        endpoints,
        sender,
        connector,
        cfg.reconnect_policy(),
    ));

    let report = engine.start().await?;
    for (key, reason) in &report.skipped {
        warn!("Subscription {} not started: {}", key, reason);
    }

    if cfg.is_api_enabled() {
        let service = Arc::new(SubscriptionService::new(repository, abi_resolver, Some(Arc::clone(&engine))));
        let state = AppState::new(service, Arc::clone(&engine), cfg.signing_secret());
        let bind_address = cfg.api_bind_address();
        tokio::spawn(async move {
            if let Err(e) = web_api::start_web_server(state, &bind_address).await {
                error!("Web API stopped: {:#}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");

    for (key, exit) in engine.shutdown().await {
        info!("Worker for {} exited: {:?}", key, exit);
    }

    Ok(())
}
