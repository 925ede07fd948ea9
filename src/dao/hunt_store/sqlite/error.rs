use thiserror::Error;

pub type SqliteResult<T> = std::result::Result<T, SqliteDaoError>;

#[derive(Debug, Error)]
pub enum SqliteDaoError {
    #[error("invalid SQLite connection URL `{url}`")]
    InvalidUrl {
        url: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to open SQLite pool")]
    Connect {
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to apply schema statement for `{table}`")]
    Schema {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to encode penalty schedule")]
    EncodePenalties {
        #[source]
        source: serde_json::Error,
    },
    #[error("SQLite {operation} failed")]
    Query {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl SqliteDaoError {
    pub(super) fn query(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| SqliteDaoError::Query { operation, source }
    }
}
