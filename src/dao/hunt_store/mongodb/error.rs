use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to write lock for question {question_id}")]
    WriteLock {
        question_id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to read locks")]
    ReadLocks {
        #[source]
        source: MongoError,
    },
    #[error("failed to update attempts of team {team_id} on question {question_id}")]
    WriteAttempts {
        team_id: i64,
        question_id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to read attempts of team {team_id}")]
    ReadAttempts {
        team_id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to update quota slot of team {team_id}")]
    WriteSlot {
        team_id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to update solve timer of team {team_id} on question {question_id}")]
    WriteTimer {
        team_id: i64,
        question_id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to read solve timers of team {team_id}")]
    ReadTimers {
        team_id: i64,
        #[source]
        source: MongoError,
    },
    #[error("upsert of `{collection}` returned no document")]
    MissingUpsert { collection: &'static str },
}

/// Whether the server rejected a write because of a unique index.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY,
        _ => false,
    }
}
