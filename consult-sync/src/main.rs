//! Headless sync agent: prefetches on login and tails realtime topics.

use consult_realtime::Subscription;
use consult_sync::{init_tracing, SyncClient, SyncConfig, SyncError};
use serde_json::Value;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    let config = SyncConfig::load()?;
    init_tracing(config.log.format)?;

    let client = SyncClient::from_config(&config)?;

    let _subscriptions: Vec<Subscription> = config
        .topics
        .iter()
        .map(|topic| {
            let name = topic.clone();
            client.channel().subscribe(topic, move |payload: &Value| {
                info!(topic = %name, payload = %payload, "Realtime event");
            })
        })
        .collect();

    let prefetch = if config.prefetch.enabled {
        Some(client.prefetch().schedule_after_login(config.prefetch_delay()))
    } else {
        None
    };

    let mut progress = client.prefetch().progress_changes();
    let mut connection = client.channel().state_changes();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *progress.borrow_and_update();
                info!(
                    running = current.is_running,
                    completed = current.completed,
                    total = current.total,
                    percent = current.percent,
                    "Prefetch progress"
                );
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                info!(state = %state, "Realtime connection");
            }
            signal = &mut shutdown => {
                if let Err(err) = signal {
                    warn!(error = %err, "Failed to listen for ctrl-c");
                }
                break;
            }
        }
    }

    if let Some(handle) = prefetch {
        handle.abort();
    }
    info!(counts = ?client.cache().counter().snapshot(), "Shutting down");
    Ok(())
}
