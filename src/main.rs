use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use stock_alert_bot::agent::ScanAgent;
use stock_alert_bot::commands::{self, CommandService};
use stock_alert_bot::config::{Config, StoreBackend};
use stock_alert_bot::market::{MarketData, YahooClient};
use stock_alert_bot::notify::{LogNotifier, Notifier, TelegramClient};
use stock_alert_bot::store::{JsonStore, PositionStore, SheetsStore};
use stock_alert_bot::trading::PositionTracker;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.to_lowercase()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let store: Arc<dyn PositionStore> = match cfg.store_backend {
        StoreBackend::Sheets => Arc::new(
            SheetsStore::connect(&cfg.sheet_id, &cfg.google_creds_json, &cfg.google_creds_file)
                .await
                .context("connecting to Google Sheets")?,
        ),
        StoreBackend::Json => Arc::new(
            JsonStore::open(cfg.store_file())
                .await
                .context("opening position store")?,
        ),
    };

    let market: Arc<dyn MarketData> = Arc::new(YahooClient::new(&cfg)?);

    let telegram = if cfg.has_telegram() {
        Some(Arc::new(TelegramClient::new(&cfg)?))
    } else {
        warn!("TELEGRAM_TOKEN / TELEGRAM_CHAT_ID not set: alerts go to the log only");
        None
    };
    let notifier: Arc<dyn Notifier> = match &telegram {
        Some(t) => t.clone(),
        None => Arc::new(LogNotifier::new()),
    };

    let tracker = Arc::new(PositionTracker::new(&cfg, store));
    let agent = Arc::new(ScanAgent::new(cfg.shared(), market, tracker, notifier).await);

    if let Some(telegram) = telegram {
        let service = Arc::new(CommandService::new(agent.clone()));
        tokio::spawn(commands::serve(service, telegram));
    } else {
        info!("Command worker disabled");
    }

    agent.run().await?;

    Ok(())
}
