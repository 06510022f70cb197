use thiserror::Error;

use grantflow_core::GrantError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("grant {0} already exists")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("row decode error: {0}")]
    Decode(String),
}

impl StoreError {
    /// Map to an HTTP status code for API responses.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Database(_) | Self::Decode(_) => 500,
        }
    }
}

impl From<StoreError> for GrantError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(id) => GrantError::PersistenceConflict { id },
            StoreError::NotFound(what) => GrantError::NotFound(what),
            other => GrantError::Storage(other.to_string()),
        }
    }
}

/// Map a PostgreSQL unique violation (23505) to [`StoreError::Conflict`].
pub(crate) fn map_unique_violation(e: sqlx::Error, id: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(id.to_string());
        }
    }
    tracing::error!(grant_id = %id, error = %e, "grant store database error");
    StoreError::Database(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_folds_into_persistence_conflict() {
        let err: GrantError = StoreError::Conflict("BOE-1".into()).into();
        assert!(matches!(err, GrantError::PersistenceConflict { ref id } if id == "BOE-1"));
        assert_eq!(StoreError::Conflict("x".into()).status_code(), 409);
    }

    #[test]
    fn decode_folds_into_storage() {
        let err: GrantError = StoreError::Decode("bad status".into()).into();
        assert!(matches!(err, GrantError::Storage(_)));
    }
}
