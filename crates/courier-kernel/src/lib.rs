use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use courier_contracts::telegram::Message;
use courier_contracts::{ChatId, EventPayload, InboundEvent, UserId};
use std::path::{Path, PathBuf};

pub const ANONYMOUS_SENDER: &str = "anonymous";

/// Maps a display name onto `[A-Za-z0-9_-]`, one `_` per rejected char.
pub fn sanitize_sender(name: &str) -> String {
    if name.is_empty() {
        return ANONYMOUS_SENDER.to_string();
    }
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Drops control characters below 0x20 except newline and tab.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| (*c as u32) >= 0x20 || *c == '\n' || *c == '\t')
        .collect()
}

pub fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn unix_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Converts a platform message into a typed event.
///
/// Precedence: contact, voice, command, text; anything else is unsupported.
pub fn classify(message: &Message) -> InboundEvent {
    let payload = if let Some(contact) = &message.contact {
        EventPayload::ContactShare {
            phone_number: contact.phone_number.clone(),
            contact_user_id: contact.user_id.map(UserId),
        }
    } else if let Some(voice) = &message.voice {
        EventPayload::VoiceRecording {
            file_id: voice.file_id.clone(),
            duration_secs: voice.duration,
            mime_type: voice.mime_type.clone(),
            file_size: voice.file_size,
        }
    } else if let Some(text) = message.text.as_deref().filter(|t| !t.is_empty()) {
        match parse_command(text) {
            Some((name, args)) => EventPayload::Command { name, args },
            None => EventPayload::TextMessage {
                text: text.to_string(),
            },
        }
    } else {
        EventPayload::Unsupported {
            kind: unsupported_kind(message).to_string(),
        }
    };

    InboundEvent {
        chat_id: ChatId(message.chat.id),
        author: message.from.as_ref().map(|u| UserId(u.id)),
        sender: message
            .from
            .as_ref()
            .and_then(|u| u.username.clone())
            .unwrap_or_default(),
        received_at: unix_to_utc(message.date).unwrap_or_else(Utc::now),
        payload,
    }
}

/// Splits `/name@bot args` into (`/name`, `args`). Non-commands yield `None`.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('/') || trimmed.len() == 1 {
        return None;
    }
    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    if name.len() <= 1 {
        return None;
    }
    Some((name.to_ascii_lowercase(), rest.to_string()))
}

fn unsupported_kind(message: &Message) -> &'static str {
    if message.photo.is_some() {
        "photo"
    } else if message.sticker.is_some() {
        "sticker"
    } else if message.document.is_some() {
        "document"
    } else if message.audio.is_some() {
        "audio"
    } else if message.video.is_some() {
        "video"
    } else if message.location.is_some() {
        "location"
    } else if message.text.is_some() {
        "empty_text"
    } else {
        "unknown"
    }
}

pub fn voice_dir(root: &Path, chat_id: ChatId, sender: &str) -> PathBuf {
    root.join("voices").join(format!("{chat_id}_{sender}"))
}

/// Candidate file names for a voice asset: `{secs}.ogg`, then `{secs}-1.ogg`, ...
pub fn voice_file_name(ts: DateTime<Utc>, attempt: u32) -> String {
    if attempt == 0 {
        format!("{}.ogg", ts.timestamp())
    } else {
        format!("{}-{attempt}.ogg", ts.timestamp())
    }
}

pub fn contact_path(root: &Path, chat_id: ChatId) -> PathBuf {
    root.join("contacts").join(format!("{chat_id}.json"))
}

pub fn per_chat_text_path(root: &Path, chat_id: ChatId, ts: DateTime<Utc>) -> PathBuf {
    root.join("texts")
        .join(chat_id.to_string())
        .join(format!("{}.txt", ts.format("%Y-%m-%d")))
}

pub fn global_text_path(root: &Path, written_at: DateTime<Utc>) -> PathBuf {
    root.join("texts")
        .join(format!("{}.txt", written_at.timestamp()))
}

pub fn text_log_line(ts: DateTime<Utc>, text: &str) -> String {
    format!("[{}]: {text}\n", rfc3339(ts))
}

/// Case-insensitive extension check; `allowed` entries carry the leading dot.
pub fn is_allowed_file_type(file_path: &str, allowed: &[String]) -> bool {
    let Some(ext) = Path::new(file_path).extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = format!(".{}", ext.to_ascii_lowercase());
    allowed.iter().any(|a| a.to_ascii_lowercase() == ext)
}

pub fn render_file_url(template: &str, token: &str, file_path: &str) -> String {
    template
        .replace("{token}", token)
        .replace("{file_path}", file_path)
}
