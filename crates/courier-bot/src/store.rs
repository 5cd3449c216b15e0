use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_config::TextPartition;
use courier_contracts::{ChatId, ContactRecord};
use courier_kernel::{
    contact_path, global_text_path, per_chat_text_path, rfc3339, text_log_line, voice_dir,
    voice_file_name,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StoreError;

/// Upper bound on `{secs}-{n}.ogg` probes before giving up on a voice write.
const MAX_VOICE_SLOTS: u32 = 1_000;

/// Distinguishes concurrent contact writes within this process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write-only persistence keyed by chat.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Writes a voice recording into a fresh file and returns its path.
    async fn save_voice(
        &self,
        chat_id: ChatId,
        sender: &str,
        bytes: &[u8],
        ts: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError>;

    /// Appends one `[ts]: text` line and returns the log path.
    async fn save_text(
        &self,
        chat_id: ChatId,
        sender: &str,
        text: &str,
        ts: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError>;

    /// Creates or replaces the chat's contact record.
    async fn save_contact(
        &self,
        chat_id: ChatId,
        sender: &str,
        phone_number: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn has_contact(&self, chat_id: ChatId) -> Result<bool, StoreError>;
}

/// File-system store rooted at a single directory.
///
/// Layout:
/// - `voices/{chat_id}_{sender}/{unix_secs}.ogg`
/// - `texts/{chat_id}/{YYYY-MM-DD}.txt` or `texts/{unix_secs}.txt`
/// - `contacts/{chat_id}.json`
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    text_partition: TextPartition,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, text_partition: TextPartition) -> Self {
        Self {
            root: root.into(),
            text_partition,
        }
    }

    fn text_path(&self, chat_id: ChatId, ts: DateTime<Utc>) -> PathBuf {
        match self.text_partition {
            TextPartition::PerChat => per_chat_text_path(&self.root, chat_id, ts),
            TextPartition::Global => global_text_path(&self.root, Utc::now()),
        }
    }
}

async fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::io(dir, e))
}

#[async_trait]
impl MessageStore for LocalStore {
    async fn save_voice(
        &self,
        chat_id: ChatId,
        sender: &str,
        bytes: &[u8],
        ts: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError> {
        let dir = voice_dir(&self.root, chat_id, sender);
        ensure_dir(&dir).await?;

        for attempt in 0..MAX_VOICE_SLOTS {
            let path = dir.join(voice_file_name(ts, attempt));
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StoreError::io(path, e)),
            };
            // Partial files are left in place on failure.
            file.write_all(bytes)
                .await
                .map_err(|e| StoreError::io(&path, e))?;
            file.flush().await.map_err(|e| StoreError::io(&path, e))?;
            debug!(chat_id = %chat_id, path = %path.display(), bytes = bytes.len(), "voice written");
            return Ok(path);
        }

        Err(StoreError::io(
            dir,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("no free voice slot for {}", ts.timestamp()),
            ),
        ))
    }

    async fn save_text(
        &self,
        chat_id: ChatId,
        sender: &str,
        text: &str,
        ts: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError> {
        let path = self.text_path(chat_id, ts);
        if let Some(parent) = path.parent() {
            ensure_dir(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        file.write_all(text_log_line(ts, text).as_bytes())
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        file.flush().await.map_err(|e| StoreError::io(&path, e))?;
        debug!(chat_id = %chat_id, sender, path = %path.display(), "text appended");
        Ok(path)
    }

    async fn save_contact(
        &self,
        chat_id: ChatId,
        sender: &str,
        phone_number: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let path = contact_path(&self.root, chat_id);
        if let Some(parent) = path.parent() {
            ensure_dir(parent).await?;
        }

        let record = ContactRecord {
            username: sender.to_string(),
            phone_number: phone_number.to_string(),
            timestamp: rfc3339(ts),
        };
        let data = serde_json::to_vec_pretty(&record)?;

        // Each writer gets its own temp file; the last rename wins.
        let tmp = path.with_extension(format!(
            "json.{}-{}.tmp",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, &data)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::io(&path, e));
        }
        debug!(chat_id = %chat_id, path = %path.display(), "contact saved");
        Ok(())
    }

    async fn has_contact(&self, chat_id: ChatId) -> Result<bool, StoreError> {
        let path = contact_path(&self.root, chat_id);
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}
