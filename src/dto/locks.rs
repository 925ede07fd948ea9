use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::dao::models::QuestionLockEntity;

/// Active lock as exposed to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LockView {
    pub question_id: i64,
    pub locked_by_team_id: i64,
    pub locked_by_name: String,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub locked_at: OffsetDateTime,
}

impl From<QuestionLockEntity> for LockView {
    fn from(value: QuestionLockEntity) -> Self {
        Self {
            question_id: value.question_id,
            locked_by_team_id: value.locked_by_team_id,
            locked_by_name: value.locked_by_team_name,
            locked_at: value.locked_at,
        }
    }
}

/// Lock state of a single question; holder fields are omitted when unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuestionStatusResponse {
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by_team: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by_name: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub locked_at: Option<OffsetDateTime>,
}

impl From<Option<QuestionLockEntity>> for QuestionStatusResponse {
    fn from(value: Option<QuestionLockEntity>) -> Self {
        match value {
            Some(lock) => Self {
                locked: true,
                locked_by_team: Some(lock.locked_by_team_id),
                locked_by_name: Some(lock.locked_by_team_name),
                locked_at: Some(lock.locked_at),
            },
            None => Self {
                locked: false,
                locked_by_team: None,
                locked_by_name: None,
                locked_at: None,
            },
        }
    }
}
