use std::sync::Arc;
use std::time::Duration;

use courier_config::Config;
use courier_kernel::classify;
use tracing::{debug, error, info, warn};

mod dispatch;
mod error;
mod outbound;
mod store;
mod telegram;

pub use dispatch::Dispatcher;
pub use error::{DispatchError, StoreError, TransportError};
pub use outbound::Outbound;
pub use store::{LocalStore, MessageStore};
pub use telegram::{reply_markup, TelegramClient};

/// Long-polls the Bot API and hands every message to the dispatcher.
///
/// Each event is handled on its own task; a failing event is logged and never
/// stops the loop. Returns only when the client cannot be built.
pub async fn run(cfg: Config) -> Result<(), String> {
    let client = Arc::new(TelegramClient::new(&cfg.telegram)?);
    let store = Arc::new(LocalStore::new(
        cfg.storage.root.as_str(),
        cfg.storage.text_partition,
    ));
    let dispatcher = Arc::new(Dispatcher::from_config(&cfg, store, client.clone()));
    let backoff = Duration::from_millis(cfg.telegram.poll_retry_backoff_ms);

    info!(
        storage_root = %cfg.storage.root,
        text_partition = ?cfg.storage.text_partition,
        "bot started, polling for updates"
    );

    let mut offset = 0i64;
    loop {
        let updates = match client
            .get_updates(offset, cfg.telegram.poll_timeout_secs)
            .await
        {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "polling for updates failed, retrying");
                tokio::time::sleep(backoff).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(message) = update.message else {
                debug!(update_id = update.update_id, "skipping update without message");
                continue;
            };
            let event = classify(&message);
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let chat_id = event.chat_id;
                if let Err(e) = dispatcher.handle_message(Some(event)).await {
                    error!(chat_id = %chat_id, error = %e, "failed to handle message");
                }
            });
        }
    }
}
