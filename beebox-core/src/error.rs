use thiserror::Error;

/// Failures from the HTTP collaborator.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },
}

impl HttpError {
    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures from the OTA engine.
///
/// `Http` and `BadManifest` abort a check cycle before any filesystem
/// write; `HashMismatch` aborts the whole staging batch before any
/// live-file mutation.
#[derive(Debug, Error)]
pub enum OtaError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("malformed document: {0}")]
    BadManifest(#[from] serde_json::Error),

    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("manifest path escapes the firmware root: {0}")]
    UnsafePath(String),

    #[error("staged file missing during apply: {0}")]
    MissingStaged(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
