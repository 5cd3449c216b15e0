use std::time::Duration;

use async_trait::async_trait;
use courier_config::Telegram;
use courier_contracts::telegram::{
    ApiResponse, File, GetFileRequest, GetUpdatesRequest, KeyboardButton, ReplyKeyboardMarkup,
    ReplyKeyboardRemove, ReplyMarkup, SendMessageRequest, Update,
};
use courier_contracts::{ChatId, Keyboard, RemoteFileRef};
use courier_kernel::render_file_url;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::TransportError;
use crate::outbound::Outbound;

/// Bot API client covering long-polling, replies and file downloads.
pub struct TelegramClient {
    client: Client,
    api_base_url: String,
    token: String,
    file_url_template: String,
}

impl TelegramClient {
    pub fn new(cfg: &Telegram) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            file_url_template: cfg.file_url_template.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base_url, self.token, method)
    }

    async fn call<Req, Res>(&self, method: &str, request: &Req) -> Result<Res, TransportError>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.method_url(method))
            .json(request)
            .send()
            .await
            .map_err(http_error)?;
        let status = response.status();
        // Error replies carry a JSON body with `ok: false` too.
        let body: ApiResponse<Res> = response.json().await.map_err(|e| {
            if status.is_success() {
                http_error(e)
            } else {
                TransportError::Status(status.as_u16())
            }
        })?;
        if !body.ok {
            return Err(TransportError::Api {
                code: body.error_code,
                description: body.description.unwrap_or_default(),
            });
        }
        body.result.ok_or_else(|| TransportError::Api {
            code: None,
            description: format!("{method} returned ok without a result"),
        })
    }

    /// Long-polls for updates starting at `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TransportError> {
        self.call(
            "getUpdates",
            &GetUpdatesRequest {
                offset,
                timeout: timeout_secs,
                allowed_updates: vec!["message".to_string()],
            },
        )
        .await
    }
}

/// Drops the request URL, which embeds the bot token.
fn http_error(err: reqwest::Error) -> TransportError {
    TransportError::Http(err.without_url().to_string())
}

pub fn reply_markup(keyboard: Keyboard) -> ReplyMarkup {
    match keyboard {
        Keyboard::RequestContact { button_text } => ReplyMarkup::Keyboard(ReplyKeyboardMarkup {
            keyboard: vec![vec![KeyboardButton {
                text: button_text,
                request_contact: true,
            }]],
            one_time_keyboard: true,
            resize_keyboard: true,
        }),
        Keyboard::Remove => ReplyMarkup::Remove(ReplyKeyboardRemove {
            remove_keyboard: true,
        }),
    }
}

#[async_trait]
impl Outbound for TelegramClient {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        let request = SendMessageRequest {
            chat_id: chat_id.0,
            text: text.to_string(),
            reply_markup: keyboard.map(reply_markup),
        };
        let _: Value = self.call("sendMessage", &request).await?;
        debug!(chat_id = %chat_id, "message sent");
        Ok(())
    }

    async fn request_file(&self, file_id: &str) -> Result<RemoteFileRef, TransportError> {
        let file: File = self
            .call(
                "getFile",
                &GetFileRequest {
                    file_id: file_id.to_string(),
                },
            )
            .await?;
        let path = file.file_path.ok_or_else(|| TransportError::Api {
            code: None,
            description: format!("file {file_id} has no downloadable path"),
        })?;
        Ok(RemoteFileRef {
            file_id: file.file_id,
            path,
            size: file.file_size,
        })
    }

    async fn download(
        &self,
        file: &RemoteFileRef,
        max_bytes: u64,
    ) -> Result<Vec<u8>, TransportError> {
        let url = render_file_url(&self.file_url_template, &self.token, &file.path);
        let mut response = self.client.get(url).send().await.map_err(http_error)?;
        if response.status() != StatusCode::OK {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        if response.content_length().is_some_and(|len| len > max_bytes) {
            return Err(TransportError::TooLarge { limit: max_bytes });
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(http_error)? {
            if (bytes.len() + chunk.len()) as u64 > max_bytes {
                return Err(TransportError::TooLarge { limit: max_bytes });
            }
            bytes.extend_from_slice(&chunk);
        }
        debug!(file_id = %file.file_id, bytes = bytes.len(), "file downloaded");
        Ok(bytes)
    }
}
