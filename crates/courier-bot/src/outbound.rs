use async_trait::async_trait;
use courier_contracts::{ChatId, Keyboard, RemoteFileRef};

use crate::error::TransportError;

/// Replies and file retrieval against the messaging platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError>;

    /// Resolves a platform file id into a download handle.
    async fn request_file(&self, file_id: &str) -> Result<RemoteFileRef, TransportError>;

    /// Downloads the file, failing with `TooLarge` past `max_bytes`.
    async fn download(
        &self,
        file: &RemoteFileRef,
        max_bytes: u64,
    ) -> Result<Vec<u8>, TransportError>;
}
