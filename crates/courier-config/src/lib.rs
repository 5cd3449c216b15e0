use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: Telegram,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub replies: Replies,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telegram {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Download URL with `{token}` and `{file_path}` placeholders.
    #[serde(default = "default_file_url_template")]
    pub file_url_template: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_poll_retry_backoff_ms")]
    pub poll_retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextPartition {
    /// `texts/{chat_id}/{YYYY-MM-DD}.txt`
    #[default]
    PerChat,
    /// `texts/{unix_seconds}.txt`, shared by every chat.
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
    #[serde(default = "default_storage_root")]
    pub root: String,
    #[serde(default)]
    pub text_partition: TextPartition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replies {
    #[serde(default = "default_true")]
    pub send_acknowledgment: bool,
    #[serde(default = "default_acknowledgment_text")]
    pub acknowledgment_text: String,
    #[serde(default = "default_welcome_text")]
    pub welcome_text: String,
    #[serde(default = "default_consent_prompt_text")]
    pub consent_prompt_text: String,
    #[serde(default = "default_consent_button_text")]
    pub consent_button_text: String,
    #[serde(default = "default_contact_confirmed_text")]
    pub contact_confirmed_text: String,
    #[serde(default = "default_contact_rejected_text")]
    pub contact_rejected_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_allowed_file_types")]
    pub allowed_file_types: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Logging {
    #[serde(default)]
    pub debug: bool,
}

impl Default for Telegram {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base_url: default_api_base_url(),
            file_url_template: default_file_url_template(),
            poll_timeout_secs: default_poll_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_retry_backoff_ms: default_poll_retry_backoff_ms(),
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            text_partition: TextPartition::default(),
        }
    }
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            send_acknowledgment: true,
            acknowledgment_text: default_acknowledgment_text(),
            welcome_text: default_welcome_text(),
            consent_prompt_text: default_consent_prompt_text(),
            consent_button_text: default_consent_button_text(),
            contact_confirmed_text: default_contact_confirmed_text(),
            contact_rejected_text: default_contact_rejected_text(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
            allowed_file_types: default_allowed_file_types(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_file_url_template() -> String {
    "https://api.telegram.org/file/bot{token}/{file_path}".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    90
}

fn default_poll_retry_backoff_ms() -> u64 {
    3_000
}

fn default_storage_root() -> String {
    "messages".to_string()
}

fn default_acknowledgment_text() -> String {
    "Message received!".to_string()
}

fn default_welcome_text() -> String {
    "Welcome! Send me a text or a voice message and I will keep it safe.".to_string()
}

fn default_consent_prompt_text() -> String {
    "Before we start, please share your contact using the button below.".to_string()
}

fn default_consent_button_text() -> String {
    "Share my contact".to_string()
}

fn default_contact_confirmed_text() -> String {
    "Thanks, your contact is saved. You can now send text and voice messages.".to_string()
}

fn default_contact_rejected_text() -> String {
    "Please share your own contact, not someone else's.".to_string()
}

fn default_max_file_size_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_allowed_file_types() -> Vec<String> {
    [".ogg", ".oga", ".mp3", ".wav", ".m4a"]
        .iter()
        .map(|v| v.to_string())
        .collect()
}

/// Loads the YAML file at `path` (or an empty document when `None`), applies
/// process environment overrides and validates the result.
pub fn load_and_validate(path: Option<&str>) -> Result<Config, ConfigError> {
    load_with_env(path, |key| std::env::var(key).ok())
}

pub fn load_with_env<F>(path: Option<&str>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let instance = match path {
        Some(path) => {
            let config_text =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
            let value: serde_yaml::Value = serde_yaml::from_str(&config_text)
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            match serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))? {
                serde_json::Value::Null => serde_json::json!({}),
                other => other,
            }
        }
        None => serde_json::json!({}),
    };
    validate_against_schema(&instance)?;

    let mut cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    apply_env_overrides(&mut cfg, env)?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn apply_env_overrides<F>(cfg: &mut Config, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Empty values count as unset.
    let get = |key: &str| env(key).filter(|v| !v.is_empty());

    if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
        cfg.telegram.token = v;
    }
    if let Some(v) = get("TELEGRAM_FILE_BASE_URL") {
        cfg.telegram.file_url_template = v;
    }
    if let Some(v) = get("STORAGE_PATH") {
        cfg.storage.root = v;
    }
    if let Some(v) = get("DEBUG") {
        cfg.logging.debug = v == "true";
    }
    if let Some(v) = get("SEND_ACKNOWLEDGMENT") {
        cfg.replies.send_acknowledgment = v == "true";
    }
    if let Some(v) = get("ACKNOWLEDGMENT_MESSAGE") {
        cfg.replies.acknowledgment_text = v;
    }
    if let Some(v) = get("MAX_FILE_SIZE") {
        cfg.limits.max_file_size_bytes = v
            .parse()
            .map_err(|e| ConfigError::Parse(format!("MAX_FILE_SIZE={v}: {e}")))?;
    }
    Ok(())
}

const SCHEMA_FILE: &str = "config/config.schema.json";

/// The schema ships next to the binary's working directory or in the workspace.
fn schema_path() -> Result<std::path::PathBuf, ConfigError> {
    let workspace = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    [std::path::PathBuf::from(SCHEMA_FILE), workspace.join(SCHEMA_FILE)]
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| {
            ConfigError::SchemaLoad(format!(
                "courier config schema {SCHEMA_FILE} not found in the working directory or workspace"
            ))
        })
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let path = schema_path()?;
    let schema: serde_json::Value = std::fs::read_to_string(&path)
        .map_err(|e| ConfigError::SchemaLoad(format!("{}: {e}", path.display())))
        .and_then(|text| {
            serde_json::from_str(&text)
                .map_err(|e| ConfigError::SchemaLoad(format!("{}: {e}", path.display())))
        })?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let problems: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();
    if !problems.is_empty() {
        return Err(ConfigError::SchemaValidation(problems.join("; ")));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.telegram.token.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "telegram.token (or TELEGRAM_BOT_TOKEN) is required".to_string(),
        ));
    }
    if !cfg.telegram.file_url_template.contains("{file_path}") {
        return Err(ConfigError::UnsupportedConfig(
            "telegram.file_url_template must contain {file_path}".to_string(),
        ));
    }
    if cfg.telegram.request_timeout_secs <= cfg.telegram.poll_timeout_secs {
        return Err(ConfigError::UnsupportedConfig(format!(
            "telegram.request_timeout_secs={} must exceed poll_timeout_secs={}",
            cfg.telegram.request_timeout_secs, cfg.telegram.poll_timeout_secs
        )));
    }
    if cfg.storage.root.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "storage.root must not be empty".to_string(),
        ));
    }
    if cfg.limits.max_file_size_bytes == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "limits.max_file_size_bytes must be >= 1".to_string(),
        ));
    }
    if cfg.limits.allowed_file_types.is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "limits.allowed_file_types must list at least one extension".to_string(),
        ));
    }
    Ok(())
}
