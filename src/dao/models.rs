use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Exclusive claim a team holds on a question while attempting it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionLockEntity {
    /// Question being worked on; at most one lock row exists per question.
    pub question_id: i64,
    /// Team holding the lock.
    pub locked_by_team_id: i64,
    /// Display name of the holding team, captured when the lock was taken.
    pub locked_by_team_name: String,
    /// When the lock was acquired.
    #[serde(with = "time::serde::rfc3339")]
    pub locked_at: OffsetDateTime,
}

impl QuestionLockEntity {
    /// Whether the lock was taken at or before `cutoff` and should be treated as abandoned.
    pub fn is_stale(&self, cutoff: OffsetDateTime) -> bool {
        self.locked_at <= cutoff
    }
}

/// Wrong-answer bookkeeping for one (team, question) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionAttemptEntity {
    /// Team that answered.
    pub team_id: i64,
    /// Question that was answered.
    pub question_id: i64,
    /// Number of wrong answers so far.
    pub wrong_attempts: u32,
    /// Points subtracted so far for this pair.
    pub total_penalty: i64,
    /// Time of the most recent wrong answer.
    #[serde(with = "time::serde::rfc3339")]
    pub last_attempt_at: OffsetDateTime,
}

/// Rolling solve-quota window of a team.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaSlotEntity {
    /// Team owning the window.
    pub team_id: i64,
    /// Start of the current window.
    #[serde(with = "time::serde::rfc3339")]
    pub current_slot_start: OffsetDateTime,
    /// Solves confirmed inside the current window.
    pub questions_solved_in_slot: u32,
}

/// Time a team spent on one question, from first opening it to solving it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionTimerEntity {
    pub team_id: i64,
    pub question_id: i64,
    /// When the team first opened the question.
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// When the team solved it; `None` while still running.
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Whole seconds between start and completion.
    pub time_taken_seconds: Option<i64>,
}

impl QuestionTimerEntity {
    /// A running timer started at `started_at`.
    pub fn started(team_id: i64, question_id: i64, started_at: OffsetDateTime) -> Self {
        Self {
            team_id,
            question_id,
            started_at,
            completed_at: None,
            time_taken_seconds: None,
        }
    }

    /// Stop the timer at `completed_at`. No-op when already stopped.
    pub fn complete(&mut self, completed_at: OffsetDateTime) {
        if self.completed_at.is_some() {
            return;
        }
        self.completed_at = Some(completed_at);
        self.time_taken_seconds = Some((completed_at - self.started_at).whole_seconds().max(0));
    }
}
