use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use tgm_core::{config::Config, store::PostStore};
use tgm_server::{run_sync, AppState};
use tgm_telegram::{DeliveryMode, TelegramClient};

#[tokio::main]
async fn main() -> Result<(), tgm_core::Error> {
    tgm_core::logging::init("tgm")?;

    let cfg = Arc::new(Config::load()?);
    let client = Arc::new(TelegramClient::from_config(&cfg)?);
    let store = PostStore::open(&cfg.store_path)?;
    let state = Arc::new(AppState::new(cfg.clone(), client.clone(), store));

    if client.is_configured() {
        // Long polling owns getUpdates; a leftover webhook would starve it.
        match client.ensure_polling().await {
            Ok(DeliveryMode::Webhook) => info!("removed webhook, switched to long polling"),
            Ok(DeliveryMode::Polling) => {}
            Err(e) => warn!("could not verify delivery mode: {e}"),
        }
        spawn_sync_loop(state.clone());
    } else {
        warn!("bot token or channel not configured, serving stored posts only");
    }

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, tgm_server::router(state))
        .await
        .map_err(|e| tgm_core::Error::Http(format!("server failed: {e}")))?;

    Ok(())
}

fn spawn_sync_loop(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = interval(state.cfg.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match run_sync(&state).await {
                Ok(report) if report.saved > 0 => {
                    info!(
                        updates = report.updates,
                        saved = report.saved,
                        "channel sync"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("channel sync failed: {e}"),
            }
        }
    });
}
