use thiserror::Error;

/// Error taxonomy shared by capture, scoring, persistence and delivery.
#[derive(Error, Debug)]
pub enum GrantError {
    /// Network or timeout failure talking to a source or the delivery endpoint.
    #[error("transport error ({source_name}): {message}")]
    Transport {
        source_name: String,
        message: String,
        timeout: bool,
    },

    /// A single source record that cannot be normalized.
    #[error("malformed record from {source_name}: {reason}")]
    MalformedRecord { source_name: String, reason: String },

    /// Invalid rule kind, regex or profile document.
    #[error("validation error: {0}")]
    Validation(String),

    /// Concurrent insert of the same natural code.
    #[error("persistence conflict on grant {id}")]
    PersistenceConflict { id: String },

    /// 4xx from the downstream endpoint.
    #[error("delivery rejected with HTTP {status}: {body}")]
    DeliveryRejected { status: u16, body: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GrantError {
    pub fn transport(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            source_name: source_name.into(),
            message: message.into(),
            timeout: false,
        }
    }

    pub fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Transport errors and timeouts may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<serde_json::Error> for GrantError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GrantError>;
