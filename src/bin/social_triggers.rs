//! social-triggers: invitation API, webhooks and fulfillment worker
//!
//! ## Architecture
//! ```text
//! [Moralis Streams] ──webhook──┐
//!                              ├──▶ [fulfillment ledger] ──▶ [worker] ──▶ Telegram invite link
//! [JSON-RPC] ──log poller──────┘         (SQLite)                   └──▶ email to buyer
//!
//! [frontend] ──REST──▶ groups / purchase intents
//! [Telegram] ──webhook──▶ /linkgroup
//! ```
//!
//! ## Configuration
//! `config.yaml`, `--config <path>`, `TRIGGERS_CONFIG`, then `TRIGGERS__*`
//! environment variables. Logging via `TRIGGERS_LOG` and `TRIGGERS_LOG_FORMAT`.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use social_triggers::chain::{ChainReader, RpcChainReader};
use social_triggers::clients::{BotApiClient, Mailer, ResendMailer, TelegramApi};
use social_triggers::config::Config;
use social_triggers::handlers::{router, AppState, HttpSettings};
use social_triggers::model::parse_address;
use social_triggers::services::{FulfillmentService, GroupService, PollerService, PurchaseService};
use social_triggers::storage::init_storage;
use social_triggers::utils::bootstrap::{init_tracing, parse_config_path, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    let contract = parse_address(&config.chain.contract_address)?;
    let chain_id = config.chain.chain_id;
    info!(chain_id, contract = %config.chain.contract_address, "Starting social-triggers");

    let stores = init_storage(&config.storage).await?;

    let chain: Arc<dyn ChainReader> =
        Arc::new(RpcChainReader::connect(&config.chain.rpc_url, contract, chain_id).await?);
    let telegram: Arc<dyn TelegramApi> = Arc::new(BotApiClient::new(&config.telegram)?);
    let mailer: Arc<dyn Mailer> = Arc::new(ResendMailer::new(&config.email)?);

    let fulfillment = Arc::new(FulfillmentService::new(
        &stores,
        telegram.clone(),
        mailer,
        config.fulfillment.clone(),
        config.telegram.invite_link_ttl_secs,
    ));
    let groups = Arc::new(GroupService::new(
        stores.groups.clone(),
        chain.clone(),
        telegram.clone(),
        contract,
        chain_id,
    ));
    let purchases = Arc::new(PurchaseService::new(
        stores.groups.clone(),
        stores.invitations.clone(),
        chain.clone(),
        contract,
        chain_id,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();

    workers.push(tokio::spawn(fulfillment.clone().run(shutdown_rx.clone())));

    if config.poller.enabled {
        let poller = Arc::new(PollerService::new(
            chain.clone(),
            stores.positions.clone(),
            fulfillment.clone(),
            config.poller.clone(),
            chain_id,
            contract,
        ));
        workers.push(tokio::spawn(poller.run(shutdown_rx.clone())));
    } else {
        info!("Log poller disabled");
    }

    if is_unset(&config.webhook.telegram_secret) {
        warn!("webhook.telegram_secret is not set, Telegram updates are not authenticated");
    }

    let state = AppState {
        groups,
        purchases,
        fulfillment,
        telegram,
        settings: Arc::new(HttpSettings {
            moralis_secret: config.webhook.moralis_secret.clone().unwrap_or_default(),
            telegram_secret: config
                .webhook
                .telegram_secret
                .clone()
                .filter(|_| !is_unset(&config.webhook.telegram_secret)),
            admin_token: config.server.admin_token.clone(),
            require_confirmed: config.webhook.require_confirmed,
            contract,
            chain_id,
        }),
    };

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %listener.local_addr()?, "HTTP API listening");

    let mut shutdown_http = shutdown_rx.clone();
    let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
        let _ = shutdown_http.changed().await;
    });

    let server_task = tokio::spawn(async move { server.await });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
    }
    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "Worker task panicked");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn is_unset(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.trim().is_empty())
}
