pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;
#[cfg(feature = "sqlite-store")]
pub mod sqlite;

use std::time::Duration;

use futures::future::BoxFuture;
use time::OffsetDateTime;

use crate::dao::models::{
    QuestionAttemptEntity, QuestionLockEntity, QuestionTimerEntity, QuotaSlotEntity,
};
use crate::dao::storage::StorageResult;

/// Atomic storage primitives backing the lock manager and the attempt and quota trackers.
///
/// Every method maps to a single atomic statement in the backend so that several server
/// processes can share one store without any application-level mutual exclusion.
pub trait HuntStore: Send + Sync {
    /// Insert `lock` only if no lock exists for its question. Returns whether a row was written.
    fn insert_lock_if_absent(&self, lock: QuestionLockEntity)
    -> BoxFuture<'static, StorageResult<bool>>;
    /// Remove the lock on `question_id`. Returns whether a row was removed.
    fn delete_lock(&self, question_id: i64) -> BoxFuture<'static, StorageResult<bool>>;
    /// Remove the lock on `question_id` only when `team_id` holds it.
    fn delete_lock_held_by(
        &self,
        question_id: i64,
        team_id: i64,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Remove the lock on `question_id` if it was taken at or before `cutoff`.
    fn delete_stale_lock(
        &self,
        question_id: i64,
        cutoff: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Remove every lock taken at or before `cutoff`, returning how many were removed.
    fn delete_stale_locks(&self, cutoff: OffsetDateTime) -> BoxFuture<'static, StorageResult<u64>>;
    /// Fetch the lock on `question_id`, if any.
    fn find_lock(&self, question_id: i64)
    -> BoxFuture<'static, StorageResult<Option<QuestionLockEntity>>>;
    /// List every lock ordered by question id.
    fn list_locks(&self) -> BoxFuture<'static, StorageResult<Vec<QuestionLockEntity>>>;

    /// Fetch the attempt row of a (team, question) pair, if any.
    fn find_attempt(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionAttemptEntity>>>;
    /// Atomically increment the wrong-answer counter and add `penalties[previous count]`.
    ///
    /// Returns the updated row, or `None` when the counter already reached `penalties.len()`;
    /// in that case nothing is written.
    fn record_wrong_attempt(
        &self,
        team_id: i64,
        question_id: i64,
        penalties: Vec<i64>,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionAttemptEntity>>>;
    /// Remove the attempt row of a (team, question) pair. Returns whether a row was removed.
    fn delete_attempts(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Sum of penalties recorded for `team_id` across all questions.
    fn sum_penalties(&self, team_id: i64) -> BoxFuture<'static, StorageResult<i64>>;

    /// Return the team's slot, creating it or rolling it over when `slot_duration` has elapsed.
    fn current_slot(
        &self,
        team_id: i64,
        now: OffsetDateTime,
        slot_duration: Duration,
    ) -> BoxFuture<'static, StorageResult<QuotaSlotEntity>>;
    /// Roll the slot over if due, then count one more solve in it.
    fn increment_slot(
        &self,
        team_id: i64,
        now: OffsetDateTime,
        slot_duration: Duration,
    ) -> BoxFuture<'static, StorageResult<QuotaSlotEntity>>;

    /// Start the solve timer of a (team, question) pair unless one exists. Returns whether
    /// a timer was started.
    fn start_timer_if_absent(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Stop a running timer at `now` and return it; `None` when no running timer exists.
    fn complete_timer(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionTimerEntity>>>;
    fn find_timer(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionTimerEntity>>>;
    /// Remove the timer of a (team, question) pair. Returns whether a row was removed.
    fn delete_timer(&self, team_id: i64, question_id: i64)
    -> BoxFuture<'static, StorageResult<bool>>;
    /// Seconds spent on every question `team_id` completed.
    fn sum_solve_seconds(&self, team_id: i64) -> BoxFuture<'static, StorageResult<i64>>;

    /// Cheap round-trip used by the health endpoint and the storage supervisor.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the underlying connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Whether a slot that started at `start` has run its full duration at `now`.
pub(crate) fn slot_expired(start: OffsetDateTime, now: OffsetDateTime, duration: Duration) -> bool {
    now - start >= duration
}
