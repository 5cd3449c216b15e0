use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_config::{Config, Limits, Replies};
use courier_contracts::{ChatId, EventPayload, InboundEvent, Keyboard, UserId};
use courier_kernel::{is_allowed_file_type, sanitize_sender, sanitize_text};
use tracing::{debug, error, info, warn};

use crate::error::DispatchError;
use crate::outbound::Outbound;
use crate::store::MessageStore;

/// Commands answered with the welcome text once a chat has consented.
const WELCOME_COMMANDS: [&str; 2] = ["/start", "/help"];

/// Access gate and payload router for inbound events.
///
/// Every event other than a contact share is dropped until the chat has a
/// contact record on file; the sender is prompted to share their own contact
/// instead. Consented chats get their payload persisted through the store.
pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    outbound: Arc<dyn Outbound>,
    replies: Replies,
    limits: Limits,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        outbound: Arc<dyn Outbound>,
        replies: Replies,
        limits: Limits,
    ) -> Self {
        Self {
            store,
            outbound,
            replies,
            limits,
        }
    }

    pub fn from_config(
        cfg: &Config,
        store: Arc<dyn MessageStore>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self::new(store, outbound, cfg.replies.clone(), cfg.limits.clone())
    }

    pub async fn handle_message(&self, event: Option<InboundEvent>) -> Result<(), DispatchError> {
        let event =
            event.ok_or_else(|| DispatchError::InvalidInput("received no event".to_string()))?;
        let sender = sanitize_sender(&event.sender);
        let chat_id = event.chat_id;
        debug!(
            chat_id = %chat_id,
            sender = %sender,
            kind = event.payload.kind(),
            "received event"
        );

        if !event.payload.is_contact_share() && !self.store.has_contact(chat_id).await? {
            info!(chat_id = %chat_id, sender = %sender, "no contact on file, requesting consent");
            return self.request_consent(chat_id).await;
        }

        match event.payload {
            EventPayload::ContactShare {
                phone_number,
                contact_user_id,
            } => {
                self.confirm_contact(
                    chat_id,
                    &sender,
                    event.author,
                    &phone_number,
                    contact_user_id,
                    event.received_at,
                )
                .await
            }
            EventPayload::VoiceRecording {
                file_id,
                duration_secs,
                file_size,
                ..
            } => {
                debug!(chat_id = %chat_id, duration_secs, "processing voice message");
                self.store_voice(chat_id, &sender, &file_id, file_size, event.received_at)
                    .await
            }
            EventPayload::Command { name, .. } => {
                if WELCOME_COMMANDS.contains(&name.as_str()) {
                    self.outbound
                        .send_text(chat_id, &self.replies.welcome_text, None)
                        .await?;
                } else {
                    info!(chat_id = %chat_id, command = %name, "ignoring unknown command");
                }
                Ok(())
            }
            EventPayload::TextMessage { text } => {
                self.store_text(chat_id, &sender, &text, event.received_at)
                    .await
            }
            EventPayload::Unsupported { kind } => {
                info!(chat_id = %chat_id, sender = %sender, kind = %kind, "unsupported message type");
                Ok(())
            }
        }
    }

    async fn request_consent(&self, chat_id: ChatId) -> Result<(), DispatchError> {
        self.outbound
            .send_text(
                chat_id,
                &self.replies.consent_prompt_text,
                Some(Keyboard::RequestContact {
                    button_text: self.replies.consent_button_text.clone(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn confirm_contact(
        &self,
        chat_id: ChatId,
        sender: &str,
        author: Option<UserId>,
        phone_number: &str,
        contact_user_id: Option<UserId>,
        ts: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let phone_number = phone_number.trim();
        if phone_number.is_empty() {
            return Err(DispatchError::InvalidInput(
                "contact share without a phone number".to_string(),
            ));
        }

        let own_contact = matches!((author, contact_user_id), (Some(a), Some(c)) if a == c);
        if !own_contact {
            warn!(chat_id = %chat_id, sender, "rejecting contact that belongs to someone else");
            if let Err(e) = self
                .outbound
                .send_text(chat_id, &self.replies.contact_rejected_text, None)
                .await
            {
                error!(chat_id = %chat_id, error = %e, "failed to send contact rejection");
            }
            return Err(DispatchError::AccessDenied(format!(
                "chat {chat_id} shared a contact it does not own"
            )));
        }

        self.store
            .save_contact(chat_id, sender, phone_number, ts)
            .await?;
        info!(chat_id = %chat_id, sender, "contact saved");

        if let Err(e) = self
            .outbound
            .send_text(
                chat_id,
                &self.replies.contact_confirmed_text,
                Some(Keyboard::Remove),
            )
            .await
        {
            error!(chat_id = %chat_id, error = %e, "failed to send contact confirmation");
        }
        Ok(())
    }

    async fn store_voice(
        &self,
        chat_id: ChatId,
        sender: &str,
        file_id: &str,
        declared_size: Option<u64>,
        ts: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let max = self.limits.max_file_size_bytes;
        if let Some(size) = declared_size.filter(|size| *size > max) {
            return Err(DispatchError::PayloadRejected(format!(
                "voice message of {size} bytes exceeds limit of {max}"
            )));
        }

        let file = self.outbound.request_file(file_id).await?;
        if !is_allowed_file_type(&file.path, &self.limits.allowed_file_types) {
            return Err(DispatchError::PayloadRejected(format!(
                "file type of {} is not allowed",
                file.path
            )));
        }
        if let Some(size) = file.size.filter(|size| *size > max) {
            return Err(DispatchError::PayloadRejected(format!(
                "file of {size} bytes exceeds limit of {max}"
            )));
        }

        let bytes = self.outbound.download(&file, max).await?;
        let path = self.store.save_voice(chat_id, sender, &bytes, ts).await?;
        info!(
            chat_id = %chat_id,
            sender,
            path = %path.display(),
            bytes = bytes.len(),
            "voice message saved"
        );
        Ok(())
    }

    async fn store_text(
        &self,
        chat_id: ChatId,
        sender: &str,
        text: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        debug!(chat_id = %chat_id, sender, len = text.len(), "processing text message");
        let text = sanitize_text(text);
        if text.is_empty() {
            info!(chat_id = %chat_id, sender, "text empty after sanitizing, nothing to store");
            return Ok(());
        }

        let path = self.store.save_text(chat_id, sender, &text, ts).await?;
        info!(chat_id = %chat_id, sender, path = %path.display(), "text message saved");

        if self.replies.send_acknowledgment {
            // Acknowledgment failures are logged only.
            if let Err(e) = self
                .outbound
                .send_text(chat_id, &self.replies.acknowledgment_text, None)
                .await
            {
                error!(chat_id = %chat_id, error = %e, "failed to send acknowledgment");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, TransportError};
    use crate::outbound::MockOutbound;
    use crate::store::MockMessageStore;
    use courier_contracts::RemoteFileRef;
    use std::path::PathBuf;

    fn event(chat: i64, author: i64, payload: EventPayload) -> InboundEvent {
        InboundEvent {
            chat_id: ChatId(chat),
            author: Some(UserId(author)),
            sender: "alice smith".to_string(),
            received_at: Utc::now(),
            payload,
        }
    }

    fn text(chat: i64, body: &str) -> InboundEvent {
        event(
            chat,
            7,
            EventPayload::TextMessage {
                text: body.to_string(),
            },
        )
    }

    fn voice(chat: i64, file_size: Option<u64>) -> InboundEvent {
        event(
            chat,
            7,
            EventPayload::VoiceRecording {
                file_id: "voice-1".to_string(),
                duration_secs: 2,
                mime_type: Some("audio/ogg".to_string()),
                file_size,
            },
        )
    }

    fn contact(chat: i64, author: i64, owner: Option<i64>, phone: &str) -> InboundEvent {
        event(
            chat,
            author,
            EventPayload::ContactShare {
                phone_number: phone.to_string(),
                contact_user_id: owner.map(UserId),
            },
        )
    }

    fn dispatcher(store: MockMessageStore, outbound: MockOutbound) -> Dispatcher {
        Dispatcher::new(
            Arc::new(store),
            Arc::new(outbound),
            Replies::default(),
            Limits::default(),
        )
    }

    fn consented_store() -> MockMessageStore {
        let mut store = MockMessageStore::new();
        store.expect_has_contact().returning(|_| Ok(true));
        store
    }

    #[tokio::test]
    async fn missing_event_is_invalid_input() {
        let d = dispatcher(MockMessageStore::new(), MockOutbound::new());
        let result = d.handle_message(None).await;
        assert!(matches!(result, Err(DispatchError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn unconsented_chat_gets_prompt_and_nothing_is_written() {
        let mut store = MockMessageStore::new();
        store
            .expect_has_contact()
            .withf(|chat| *chat == ChatId(99))
            .times(1)
            .returning(|_| Ok(false));
        store.expect_save_text().never();

        let mut outbound = MockOutbound::new();
        outbound
            .expect_send_text()
            .withf(|chat, _text, keyboard| {
                *chat == ChatId(99) && matches!(keyboard, Some(Keyboard::RequestContact { .. }))
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let d = dispatcher(store, outbound);
        assert!(d.handle_message(Some(text(99, "hi"))).await.is_ok());
    }

    #[tokio::test]
    async fn gate_query_failure_fails_closed() {
        let mut store = MockMessageStore::new();
        store.expect_has_contact().times(1).returning(|_| {
            Err(StoreError::io(
                "contacts/1.json",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            ))
        });
        store.expect_save_text().never();
        let mut outbound = MockOutbound::new();
        outbound.expect_send_text().never();

        let d = dispatcher(store, outbound);
        let result = d.handle_message(Some(text(1, "hi"))).await;
        assert!(matches!(result, Err(DispatchError::Io { .. })));
    }

    #[tokio::test]
    async fn own_contact_is_saved_and_confirmed_without_gate_check() {
        let mut store = MockMessageStore::new();
        store.expect_has_contact().never();
        store
            .expect_save_contact()
            .withf(|chat, sender, phone, _| {
                *chat == ChatId(42) && sender == "alice_smith" && phone == "+15551234"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let mut outbound = MockOutbound::new();
        outbound
            .expect_send_text()
            .withf(|_, _, keyboard| matches!(keyboard, Some(Keyboard::Remove)))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let d = dispatcher(store, outbound);
        let result = d
            .handle_message(Some(contact(42, 7, Some(7), " +15551234 ")))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn foreign_contact_is_rejected_with_one_message() {
        for owner in [Some(8), None] {
            let mut store = MockMessageStore::new();
            store.expect_save_contact().never();
            let mut outbound = MockOutbound::new();
            outbound
                .expect_send_text()
                .withf(|_, text, keyboard| {
                    text == Replies::default().contact_rejected_text && keyboard.is_none()
                })
                .times(1)
                .returning(|_, _, _| Ok(()));

            let d = dispatcher(store, outbound);
            let result = d
                .handle_message(Some(contact(42, 7, owner, "+15551234")))
                .await;
            assert!(matches!(result, Err(DispatchError::AccessDenied(_))));
        }
    }

    #[tokio::test]
    async fn contact_without_phone_is_invalid() {
        let mut store = MockMessageStore::new();
        store.expect_save_contact().never();
        let mut outbound = MockOutbound::new();
        outbound.expect_send_text().never();

        let d = dispatcher(store, outbound);
        let result = d.handle_message(Some(contact(42, 7, Some(7), "  "))).await;
        assert!(matches!(result, Err(DispatchError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn acknowledgment_failure_is_swallowed_after_text_is_saved() {
        let mut store = consented_store();
        store
            .expect_save_text()
            .withf(|_, _, text, _| text == "hello")
            .times(1)
            .returning(|_, _, _, _| Ok(PathBuf::from("texts/1/2026-02-14.txt")));

        let mut outbound = MockOutbound::new();
        outbound
            .expect_send_text()
            .times(1)
            .returning(|_, _, _| Err(TransportError::Http("connection reset".to_string())));

        let d = dispatcher(store, outbound);
        assert!(d.handle_message(Some(text(1, "hel\u{0}lo"))).await.is_ok());
    }

    #[tokio::test]
    async fn acknowledgment_can_be_disabled() {
        let mut store = consented_store();
        store
            .expect_save_text()
            .times(1)
            .returning(|_, _, _, _| Ok(PathBuf::from("texts/1/2026-02-14.txt")));
        let mut outbound = MockOutbound::new();
        outbound.expect_send_text().never();

        let replies = Replies {
            send_acknowledgment: false,
            ..Replies::default()
        };
        let d = Dispatcher::new(Arc::new(store), Arc::new(outbound), replies, Limits::default());
        assert!(d.handle_message(Some(text(1, "hello"))).await.is_ok());
    }

    #[tokio::test]
    async fn text_save_failure_is_surfaced_without_reply() {
        let mut store = consented_store();
        store.expect_save_text().times(1).returning(|_, _, _, _| {
            Err(StoreError::io(
                "texts",
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ))
        });
        let mut outbound = MockOutbound::new();
        outbound.expect_send_text().never();

        let d = dispatcher(store, outbound);
        let result = d.handle_message(Some(text(1, "hello"))).await;
        assert!(matches!(result, Err(DispatchError::Io { .. })));
    }

    #[tokio::test]
    async fn start_command_sends_welcome_when_consented() {
        let mut outbound = MockOutbound::new();
        outbound
            .expect_send_text()
            .withf(|_, text, _| text == Replies::default().welcome_text)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let d = dispatcher(consented_store(), outbound);
        let start = event(
            1,
            7,
            EventPayload::Command {
                name: "/start".to_string(),
                args: String::new(),
            },
        );
        assert!(d.handle_message(Some(start)).await.is_ok());
    }

    #[tokio::test]
    async fn start_command_without_contact_prompts_for_consent() {
        let mut store = MockMessageStore::new();
        store.expect_has_contact().returning(|_| Ok(false));
        let mut outbound = MockOutbound::new();
        outbound
            .expect_send_text()
            .withf(|_, text, _| text == Replies::default().consent_prompt_text)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let d = dispatcher(store, outbound);
        let start = event(
            1,
            7,
            EventPayload::Command {
                name: "/start".to_string(),
                args: String::new(),
            },
        );
        assert!(d.handle_message(Some(start)).await.is_ok());
    }

    #[tokio::test]
    async fn unsupported_payload_is_accepted_silently() {
        let mut outbound = MockOutbound::new();
        outbound.expect_send_text().never();
        let d = dispatcher(consented_store(), outbound);
        let sticker = event(
            1,
            7,
            EventPayload::Unsupported {
                kind: "sticker".to_string(),
            },
        );
        assert!(d.handle_message(Some(sticker)).await.is_ok());
    }

    #[tokio::test]
    async fn voice_is_downloaded_and_saved() {
        let mut store = consented_store();
        store
            .expect_save_voice()
            .withf(|chat, sender, bytes, _| {
                *chat == ChatId(5) && sender == "alice_smith" && bytes == b"OggS".as_slice()
            })
            .times(1)
            .returning(|_, _, _, _| Ok(PathBuf::from("voices/5_alice_smith/1.ogg")));

        let mut outbound = MockOutbound::new();
        outbound
            .expect_request_file()
            .withf(|file_id| file_id == "voice-1")
            .times(1)
            .returning(|_| {
                Ok(RemoteFileRef {
                    file_id: "voice-1".to_string(),
                    path: "voice/file_1.oga".to_string(),
                    size: Some(4),
                })
            });
        outbound
            .expect_download()
            .times(1)
            .returning(|_, _| Ok(b"OggS".to_vec()));
        outbound.expect_send_text().never();

        let d = dispatcher(store, outbound);
        assert!(d.handle_message(Some(voice(5, Some(4)))).await.is_ok());
    }

    #[tokio::test]
    async fn oversized_voice_is_rejected_before_download() {
        let mut store = consented_store();
        store.expect_save_voice().never();
        let mut outbound = MockOutbound::new();
        outbound.expect_request_file().never();

        let d = dispatcher(store, outbound);
        let result = d
            .handle_message(Some(voice(5, Some(Limits::default().max_file_size_bytes + 1))))
            .await;
        assert!(matches!(result, Err(DispatchError::PayloadRejected(_))));
    }

    #[tokio::test]
    async fn disallowed_file_type_is_rejected() {
        let mut store = consented_store();
        store.expect_save_voice().never();
        let mut outbound = MockOutbound::new();
        outbound.expect_request_file().times(1).returning(|_| {
            Ok(RemoteFileRef {
                file_id: "voice-1".to_string(),
                path: "documents/payload.exe".to_string(),
                size: Some(10),
            })
        });
        outbound.expect_download().never();

        let d = dispatcher(store, outbound);
        let result = d.handle_message(Some(voice(5, None))).await;
        assert!(matches!(result, Err(DispatchError::PayloadRejected(_))));
    }

    #[tokio::test]
    async fn download_failure_is_a_transport_error() {
        let mut store = consented_store();
        store.expect_save_voice().never();
        let mut outbound = MockOutbound::new();
        outbound.expect_request_file().times(1).returning(|_| {
            Ok(RemoteFileRef {
                file_id: "voice-1".to_string(),
                path: "voice/file_1.ogg".to_string(),
                size: None,
            })
        });
        outbound
            .expect_download()
            .times(1)
            .returning(|_, _| Err(TransportError::Status(502)));

        let d = dispatcher(store, outbound);
        let result = d.handle_message(Some(voice(5, None))).await;
        assert!(matches!(
            result,
            Err(DispatchError::Transport(TransportError::Status(502)))
        ));
    }
}
