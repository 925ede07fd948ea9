use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    clock::{from_unix_millis, to_unix_millis},
    dao::models::{
        QuestionAttemptEntity, QuestionLockEntity, QuestionTimerEntity, QuotaSlotEntity,
    },
};

pub fn bson_time(at: OffsetDateTime) -> DateTime {
    DateTime::from_millis(to_unix_millis(at))
}

fn entity_time(at: DateTime) -> OffsetDateTime {
    from_unix_millis(at.timestamp_millis())
}

pub fn doc_id(id: i64) -> Document {
    doc! { "_id": id }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoLockDocument {
    #[serde(rename = "_id")]
    question_id: i64,
    locked_by_team_id: i64,
    locked_by_team_name: String,
    locked_at: DateTime,
}

impl From<QuestionLockEntity> for MongoLockDocument {
    fn from(value: QuestionLockEntity) -> Self {
        Self {
            question_id: value.question_id,
            locked_by_team_id: value.locked_by_team_id,
            locked_by_team_name: value.locked_by_team_name,
            locked_at: bson_time(value.locked_at),
        }
    }
}

impl From<MongoLockDocument> for QuestionLockEntity {
    fn from(value: MongoLockDocument) -> Self {
        Self {
            question_id: value.question_id,
            locked_by_team_id: value.locked_by_team_id,
            locked_by_team_name: value.locked_by_team_name,
            locked_at: entity_time(value.locked_at),
        }
    }
}

/// One document per (team, question); `_id` is server-generated and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct MongoAttemptDocument {
    team_id: i64,
    question_id: i64,
    wrong_attempts: i64,
    total_penalty: i64,
    last_attempt_at: DateTime,
}

impl From<MongoAttemptDocument> for QuestionAttemptEntity {
    fn from(value: MongoAttemptDocument) -> Self {
        Self {
            team_id: value.team_id,
            question_id: value.question_id,
            wrong_attempts: u32::try_from(value.wrong_attempts).unwrap_or(0),
            total_penalty: value.total_penalty,
            last_attempt_at: entity_time(value.last_attempt_at),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoSlotDocument {
    #[serde(rename = "_id")]
    team_id: i64,
    current_slot_start: DateTime,
    questions_solved_in_slot: i64,
}

impl From<MongoSlotDocument> for QuotaSlotEntity {
    fn from(value: MongoSlotDocument) -> Self {
        Self {
            team_id: value.team_id,
            current_slot_start: entity_time(value.current_slot_start),
            questions_solved_in_slot: u32::try_from(value.questions_solved_in_slot).unwrap_or(0),
        }
    }
}

/// One document per (team, question); `completed_at` is absent while the timer runs.
#[derive(Debug, Clone, Deserialize)]
pub struct MongoTimerDocument {
    team_id: i64,
    question_id: i64,
    started_at: DateTime,
    completed_at: Option<DateTime>,
    time_taken_seconds: Option<i64>,
}

impl From<MongoTimerDocument> for QuestionTimerEntity {
    fn from(value: MongoTimerDocument) -> Self {
        Self {
            team_id: value.team_id,
            question_id: value.question_id,
            started_at: entity_time(value.started_at),
            completed_at: value.completed_at.map(entity_time),
            time_taken_seconds: value.time_taken_seconds,
        }
    }
}
