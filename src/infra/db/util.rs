use serde::de::DeserializeOwned;
use sqlx::types::Json;

use crate::application::repos::RepoError;

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db) if db.message().contains("duplicate key") => {
            RepoError::Duplicate {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            }
        }
        sqlx::Error::Database(db)
            if db.message().contains("violates foreign key constraint")
                || db.message().contains("invalid input syntax")
                || db.message().contains("invalid input value for enum") =>
        {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("violates") => RepoError::Integrity {
            message: db.message().to_string(),
        },
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to user request") =>
        {
            RepoError::Timeout
        }
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        other => RepoError::from_persistence(other),
    }
}

/// Decode a JSONB column into its typed form.
pub fn json_column<T: DeserializeOwned>(
    column: &'static str,
    value: serde_json::Value,
) -> Result<T, RepoError> {
    serde_json::from_value(value).map_err(|err| RepoError::Integrity {
        message: format!("column `{column}` holds malformed json: {err}"),
    })
}

/// Encode a value for a JSONB bind parameter.
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<Json<serde_json::Value>, RepoError> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(RepoError::from_persistence)
}
