use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize contact record failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("telegram api error (code {code:?}): {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("download exceeds limit of {limit} bytes")]
    TooLarge { limit: u64 },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("transport failed: {0}")]
    Transport(#[source] TransportError),
    #[error("io failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("payload rejected: {0}")]
    PayloadRejected(String),
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io { path, source } => DispatchError::Io { path, source },
            StoreError::Serialization(e) => DispatchError::Serialization(e),
        }
    }
}

impl From<TransportError> for DispatchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::TooLarge { limit } => {
                DispatchError::PayloadRejected(format!("file larger than {limit} bytes"))
            }
            other => DispatchError::Transport(other),
        }
    }
}
