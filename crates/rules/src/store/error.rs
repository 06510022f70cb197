//! Error type for the profile store.

use grantflow_core::GrantError;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("profile '{0}' not found")]
    NotFound(String),

    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, ProfileError>;

impl From<GrantError> for ProfileError {
    fn from(e: GrantError) -> Self {
        match e {
            GrantError::Validation(msg) => Self::Validation(msg),
            GrantError::NotFound(what) => Self::NotFound(what),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<ProfileError> for GrantError {
    fn from(e: ProfileError) -> Self {
        match e {
            ProfileError::Io(io) => GrantError::Io(io),
            ProfileError::Yaml(y) => GrantError::Serialize(y.to_string()),
            ProfileError::Json(j) => GrantError::Serialize(j.to_string()),
            ProfileError::Validation(msg) => GrantError::Validation(msg),
            ProfileError::NotFound(name) => GrantError::NotFound(format!("profile {name}")),
            ProfileError::Notify(n) => GrantError::Storage(n.to_string()),
        }
    }
}
