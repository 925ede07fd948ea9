use std::{str::FromStr, time::Duration};

use futures::future::BoxFuture;
use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use time::OffsetDateTime;
use tracing::info;

use super::{
    config::SqliteConfig,
    error::{SqliteDaoError, SqliteResult},
    schema::STATEMENTS,
};
use crate::{
    clock::{from_unix_millis, to_unix_millis},
    dao::{
        hunt_store::HuntStore,
        models::{
            QuestionAttemptEntity, QuestionLockEntity, QuestionTimerEntity, QuotaSlotEntity,
        },
        storage::StorageResult,
    },
};

const INSERT_LOCK: &str = "INSERT INTO question_locks
        (question_id, locked_by_team_id, locked_by_team_name, locked_at_ms)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT (question_id) DO NOTHING";

const SELECT_LOCK: &str = "SELECT question_id, locked_by_team_id, locked_by_team_name, locked_at_ms
    FROM question_locks WHERE question_id = ?1";

const SELECT_LOCKS: &str = "SELECT question_id, locked_by_team_id, locked_by_team_name, locked_at_ms
    FROM question_locks ORDER BY question_id";

// The penalty of the n-th wrong answer is read from a JSON array indexed by the
// pre-increment counter, so increment, penalty and ceiling check happen in one statement.
const RECORD_WRONG_ATTEMPT: &str = "INSERT INTO question_attempts
        (team_id, question_id, wrong_attempts, total_penalty, last_attempt_at_ms)
    VALUES (?1, ?2, 1, ?3, ?4)
    ON CONFLICT (team_id, question_id) DO UPDATE SET
        wrong_attempts = question_attempts.wrong_attempts + 1,
        total_penalty = question_attempts.total_penalty + COALESCE(
            json_extract(?6, '$[' || question_attempts.wrong_attempts || ']'), 0),
        last_attempt_at_ms = excluded.last_attempt_at_ms
    WHERE question_attempts.wrong_attempts < ?5
    RETURNING team_id, question_id, wrong_attempts, total_penalty, last_attempt_at_ms";

const SELECT_ATTEMPT: &str = "SELECT team_id, question_id, wrong_attempts, total_penalty, last_attempt_at_ms
    FROM question_attempts WHERE team_id = ?1 AND question_id = ?2";

// ?4 is the number of solves to add (0 for a plain read). SET expressions see the old row.
const UPSERT_SLOT: &str = "INSERT INTO team_quota_slots
        (team_id, current_slot_start_ms, questions_solved_in_slot)
    VALUES (?1, ?2, ?4)
    ON CONFLICT (team_id) DO UPDATE SET
        current_slot_start_ms = CASE
            WHEN ?2 - team_quota_slots.current_slot_start_ms >= ?3 THEN ?2
            ELSE team_quota_slots.current_slot_start_ms END,
        questions_solved_in_slot = CASE
            WHEN ?2 - team_quota_slots.current_slot_start_ms >= ?3 THEN ?4
            ELSE team_quota_slots.questions_solved_in_slot + ?4 END
    RETURNING team_id, current_slot_start_ms, questions_solved_in_slot";

const START_TIMER: &str = "INSERT INTO question_timers (team_id, question_id, started_at_ms)
    VALUES (?1, ?2, ?3)
    ON CONFLICT (team_id, question_id) DO NOTHING";

const COMPLETE_TIMER: &str = "UPDATE question_timers SET
        completed_at_ms = ?3,
        time_taken_seconds = MAX((?3 - started_at_ms) / 1000, 0)
    WHERE team_id = ?1 AND question_id = ?2 AND completed_at_ms IS NULL
    RETURNING team_id, question_id, started_at_ms, completed_at_ms, time_taken_seconds";

const SELECT_TIMER: &str = "SELECT team_id, question_id, started_at_ms, completed_at_ms, time_taken_seconds
    FROM question_timers WHERE team_id = ?1 AND question_id = ?2";

/// SQLite-backed [`HuntStore`] implementation.
#[derive(Clone)]
pub struct SqliteHuntStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct LockRow {
    question_id: i64,
    locked_by_team_id: i64,
    locked_by_team_name: String,
    locked_at_ms: i64,
}

impl From<LockRow> for QuestionLockEntity {
    fn from(row: LockRow) -> Self {
        Self {
            question_id: row.question_id,
            locked_by_team_id: row.locked_by_team_id,
            locked_by_team_name: row.locked_by_team_name,
            locked_at: from_unix_millis(row.locked_at_ms),
        }
    }
}

#[derive(FromRow)]
struct AttemptRow {
    team_id: i64,
    question_id: i64,
    wrong_attempts: i64,
    total_penalty: i64,
    last_attempt_at_ms: i64,
}

impl From<AttemptRow> for QuestionAttemptEntity {
    fn from(row: AttemptRow) -> Self {
        Self {
            team_id: row.team_id,
            question_id: row.question_id,
            wrong_attempts: u32::try_from(row.wrong_attempts).unwrap_or(0),
            total_penalty: row.total_penalty,
            last_attempt_at: from_unix_millis(row.last_attempt_at_ms),
        }
    }
}

#[derive(FromRow)]
struct SlotRow {
    team_id: i64,
    current_slot_start_ms: i64,
    questions_solved_in_slot: i64,
}

impl From<SlotRow> for QuotaSlotEntity {
    fn from(row: SlotRow) -> Self {
        Self {
            team_id: row.team_id,
            current_slot_start: from_unix_millis(row.current_slot_start_ms),
            questions_solved_in_slot: u32::try_from(row.questions_solved_in_slot).unwrap_or(0),
        }
    }
}

#[derive(FromRow)]
struct TimerRow {
    team_id: i64,
    question_id: i64,
    started_at_ms: i64,
    completed_at_ms: Option<i64>,
    time_taken_seconds: Option<i64>,
}

impl From<TimerRow> for QuestionTimerEntity {
    fn from(row: TimerRow) -> Self {
        Self {
            team_id: row.team_id,
            question_id: row.question_id,
            started_at: from_unix_millis(row.started_at_ms),
            completed_at: row.completed_at_ms.map(from_unix_millis),
            time_taken_seconds: row.time_taken_seconds,
        }
    }
}

impl SqliteHuntStore {
    /// Open the pool and create the coordinator tables when missing.
    pub async fn connect(config: SqliteConfig) -> SqliteResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|source| SqliteDaoError::InvalidUrl {
                url: config.url.clone(),
                source,
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
        if config.pin_connections {
            pool_options = pool_options
                .min_connections(config.max_connections)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|source| SqliteDaoError::Connect { source })?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!(url = %config.url, "SQLite store ready");
        Ok(store)
    }

    async fn ensure_schema(&self) -> SqliteResult<()> {
        for &(table, statement) in STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|source| SqliteDaoError::Schema { table, source })?;
        }
        Ok(())
    }

    async fn insert_lock_if_absent(&self, lock: QuestionLockEntity) -> SqliteResult<bool> {
        let result = sqlx::query(INSERT_LOCK)
            .bind(lock.question_id)
            .bind(lock.locked_by_team_id)
            .bind(&lock.locked_by_team_name)
            .bind(to_unix_millis(lock.locked_at))
            .execute(&self.pool)
            .await
            .map_err(SqliteDaoError::query("insert lock"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_lock(&self, question_id: i64) -> SqliteResult<bool> {
        let result = sqlx::query("DELETE FROM question_locks WHERE question_id = ?1")
            .bind(question_id)
            .execute(&self.pool)
            .await
            .map_err(SqliteDaoError::query("delete lock"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_lock_held_by(&self, question_id: i64, team_id: i64) -> SqliteResult<bool> {
        let result = sqlx::query(
            "DELETE FROM question_locks WHERE question_id = ?1 AND locked_by_team_id = ?2",
        )
        .bind(question_id)
        .bind(team_id)
        .execute(&self.pool)
        .await
        .map_err(SqliteDaoError::query("delete held lock"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_stale_lock(&self, question_id: i64, cutoff: OffsetDateTime) -> SqliteResult<bool> {
        let result =
            sqlx::query("DELETE FROM question_locks WHERE question_id = ?1 AND locked_at_ms <= ?2")
                .bind(question_id)
                .bind(to_unix_millis(cutoff))
                .execute(&self.pool)
                .await
                .map_err(SqliteDaoError::query("delete stale lock"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_stale_locks(&self, cutoff: OffsetDateTime) -> SqliteResult<u64> {
        let result = sqlx::query("DELETE FROM question_locks WHERE locked_at_ms <= ?1")
            .bind(to_unix_millis(cutoff))
            .execute(&self.pool)
            .await
            .map_err(SqliteDaoError::query("sweep stale locks"))?;
        Ok(result.rows_affected())
    }

    async fn find_lock(&self, question_id: i64) -> SqliteResult<Option<QuestionLockEntity>> {
        let row = sqlx::query_as::<_, LockRow>(SELECT_LOCK)
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqliteDaoError::query("load lock"))?;
        Ok(row.map(Into::into))
    }

    async fn list_locks(&self) -> SqliteResult<Vec<QuestionLockEntity>> {
        let rows = sqlx::query_as::<_, LockRow>(SELECT_LOCKS)
            .fetch_all(&self.pool)
            .await
            .map_err(SqliteDaoError::query("list locks"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_attempt(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> SqliteResult<Option<QuestionAttemptEntity>> {
        let row = sqlx::query_as::<_, AttemptRow>(SELECT_ATTEMPT)
            .bind(team_id)
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqliteDaoError::query("load attempts"))?;
        Ok(row.map(Into::into))
    }

    async fn record_wrong_attempt(
        &self,
        team_id: i64,
        question_id: i64,
        penalties: Vec<i64>,
        now: OffsetDateTime,
    ) -> SqliteResult<Option<QuestionAttemptEntity>> {
        let Some(&first_penalty) = penalties.first() else {
            return Ok(None);
        };
        let schedule = serde_json::to_string(&penalties)
            .map_err(|source| SqliteDaoError::EncodePenalties { source })?;

        let row = sqlx::query_as::<_, AttemptRow>(RECORD_WRONG_ATTEMPT)
            .bind(team_id)
            .bind(question_id)
            .bind(first_penalty)
            .bind(to_unix_millis(now))
            .bind(penalties.len() as i64)
            .bind(schedule)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqliteDaoError::query("record wrong attempt"))?;
        Ok(row.map(Into::into))
    }

    async fn delete_attempts(&self, team_id: i64, question_id: i64) -> SqliteResult<bool> {
        let result =
            sqlx::query("DELETE FROM question_attempts WHERE team_id = ?1 AND question_id = ?2")
                .bind(team_id)
                .bind(question_id)
                .execute(&self.pool)
                .await
                .map_err(SqliteDaoError::query("delete attempts"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn sum_penalties(&self, team_id: i64) -> SqliteResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(total_penalty), 0) FROM question_attempts WHERE team_id = ?1",
        )
        .bind(team_id)
        .fetch_one(&self.pool)
        .await
        .map_err(SqliteDaoError::query("sum penalties"))
    }

    async fn upsert_slot(
        &self,
        team_id: i64,
        now: OffsetDateTime,
        slot_duration: Duration,
        solved: i64,
    ) -> SqliteResult<QuotaSlotEntity> {
        let row = sqlx::query_as::<_, SlotRow>(UPSERT_SLOT)
            .bind(team_id)
            .bind(to_unix_millis(now))
            .bind(i64::try_from(slot_duration.as_millis()).unwrap_or(i64::MAX))
            .bind(solved)
            .fetch_one(&self.pool)
            .await
            .map_err(SqliteDaoError::query("upsert quota slot"))?;
        Ok(row.into())
    }

    async fn start_timer_if_absent(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> SqliteResult<bool> {
        let result = sqlx::query(START_TIMER)
            .bind(team_id)
            .bind(question_id)
            .bind(to_unix_millis(now))
            .execute(&self.pool)
            .await
            .map_err(SqliteDaoError::query("start timer"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_timer(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> SqliteResult<Option<QuestionTimerEntity>> {
        let row = sqlx::query_as::<_, TimerRow>(COMPLETE_TIMER)
            .bind(team_id)
            .bind(question_id)
            .bind(to_unix_millis(now))
            .fetch_optional(&self.pool)
            .await
            .map_err(SqliteDaoError::query("complete timer"))?;
        Ok(row.map(Into::into))
    }

    async fn find_timer(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> SqliteResult<Option<QuestionTimerEntity>> {
        let row = sqlx::query_as::<_, TimerRow>(SELECT_TIMER)
            .bind(team_id)
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqliteDaoError::query("load timer"))?;
        Ok(row.map(Into::into))
    }

    async fn delete_timer(&self, team_id: i64, question_id: i64) -> SqliteResult<bool> {
        let result =
            sqlx::query("DELETE FROM question_timers WHERE team_id = ?1 AND question_id = ?2")
                .bind(team_id)
                .bind(question_id)
                .execute(&self.pool)
                .await
                .map_err(SqliteDaoError::query("delete timer"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn sum_solve_seconds(&self, team_id: i64) -> SqliteResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(time_taken_seconds), 0) FROM question_timers
                WHERE team_id = ?1 AND completed_at_ms IS NOT NULL",
        )
        .bind(team_id)
        .fetch_one(&self.pool)
        .await
        .map_err(SqliteDaoError::query("sum solve time"))
    }

    async fn ping(&self) -> SqliteResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(SqliteDaoError::query("ping"))?;
        Ok(())
    }
}

impl HuntStore for SqliteHuntStore {
    fn insert_lock_if_absent(
        &self,
        lock: QuestionLockEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.insert_lock_if_absent(lock).await.map_err(Into::into) })
    }

    fn delete_lock(&self, question_id: i64) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_lock(question_id).await.map_err(Into::into) })
    }

    fn delete_lock_held_by(
        &self,
        question_id: i64,
        team_id: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_lock_held_by(question_id, team_id)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_stale_lock(
        &self,
        question_id: i64,
        cutoff: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_stale_lock(question_id, cutoff)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_stale_locks(&self, cutoff: OffsetDateTime) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.delete_stale_locks(cutoff).await.map_err(Into::into) })
    }

    fn find_lock(
        &self,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionLockEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_lock(question_id).await.map_err(Into::into) })
    }

    fn list_locks(&self) -> BoxFuture<'static, StorageResult<Vec<QuestionLockEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_locks().await.map_err(Into::into) })
    }

    fn find_attempt(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionAttemptEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_attempt(team_id, question_id)
                .await
                .map_err(Into::into)
        })
    }

    fn record_wrong_attempt(
        &self,
        team_id: i64,
        question_id: i64,
        penalties: Vec<i64>,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionAttemptEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .record_wrong_attempt(team_id, question_id, penalties, now)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_attempts(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_attempts(team_id, question_id)
                .await
                .map_err(Into::into)
        })
    }

    fn sum_penalties(&self, team_id: i64) -> BoxFuture<'static, StorageResult<i64>> {
        let store = self.clone();
        Box::pin(async move { store.sum_penalties(team_id).await.map_err(Into::into) })
    }

    fn current_slot(
        &self,
        team_id: i64,
        now: OffsetDateTime,
        slot_duration: Duration,
    ) -> BoxFuture<'static, StorageResult<QuotaSlotEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .upsert_slot(team_id, now, slot_duration, 0)
                .await
                .map_err(Into::into)
        })
    }

    fn increment_slot(
        &self,
        team_id: i64,
        now: OffsetDateTime,
        slot_duration: Duration,
    ) -> BoxFuture<'static, StorageResult<QuotaSlotEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .upsert_slot(team_id, now, slot_duration, 1)
                .await
                .map_err(Into::into)
        })
    }

    fn start_timer_if_absent(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .start_timer_if_absent(team_id, question_id, now)
                .await
                .map_err(Into::into)
        })
    }

    fn complete_timer(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionTimerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .complete_timer(team_id, question_id, now)
                .await
                .map_err(Into::into)
        })
    }

    fn find_timer(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionTimerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_timer(team_id, question_id).await.map_err(Into::into) })
    }

    fn delete_timer(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_timer(team_id, question_id).await.map_err(Into::into) })
    }

    fn sum_solve_seconds(&self, team_id: i64) -> BoxFuture<'static, StorageResult<i64>> {
        let store = self.clone();
        Box::pin(async move { store.sum_solve_seconds(team_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }

    // The pool replaces broken connections on its own; a successful ping is all that is needed.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.health_check()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use futures::future::join_all;
    use time::macros::datetime;

    use super::*;

    async fn store() -> SqliteHuntStore {
        SqliteHuntStore::connect(SqliteConfig::in_memory())
            .await
            .expect("in-memory SQLite store")
    }

    /// File-backed store so that pooled connections really run in parallel.
    async fn file_store() -> (SqliteHuntStore, PathBuf) {
        let path = std::env::temp_dir().join(format!("hunt-{}.db", uuid::Uuid::new_v4()));
        let store = SqliteHuntStore::connect(SqliteConfig::new(format!(
            "sqlite://{}?mode=rwc",
            path.display()
        )))
        .await
        .expect("file-backed SQLite store");
        (store, path)
    }

    fn remove_database(path: PathBuf) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    fn lock(question_id: i64, team_id: i64, locked_at: OffsetDateTime) -> QuestionLockEntity {
        QuestionLockEntity {
            question_id,
            locked_by_team_id: team_id,
            locked_by_team_name: format!("team-{team_id}"),
            locked_at,
        }
    }

    #[tokio::test]
    async fn second_insert_reports_zero_rows() {
        let store = store().await;
        let at = datetime!(2025-03-01 12:00 UTC);

        assert!(store.insert_lock_if_absent(lock(7, 1, at)).await.unwrap());
        assert!(!store.insert_lock_if_absent(lock(7, 2, at)).await.unwrap());

        let held = store.find_lock(7).await.unwrap().unwrap();
        assert_eq!(held.locked_by_team_id, 1);
        assert_eq!(held.locked_by_team_name, "team-1");
        assert_eq!(held.locked_at, at);
    }

    #[tokio::test]
    async fn stale_sweep_keeps_fresh_locks() {
        let store = store().await;
        store
            .insert_lock_if_absent(lock(1, 1, datetime!(2025-03-01 12:00:00 UTC)))
            .await
            .unwrap();
        store
            .insert_lock_if_absent(lock(2, 2, datetime!(2025-03-01 12:00:08 UTC)))
            .await
            .unwrap();

        let removed = store
            .delete_stale_locks(datetime!(2025-03-01 12:00:05 UTC))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let remaining = store.list_locks().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].question_id, 2);
    }

    #[tokio::test]
    async fn wrong_attempts_follow_the_schedule_and_stop_at_the_ceiling() {
        let store = store().await;
        let at = datetime!(2025-03-01 12:00 UTC);
        let penalties = vec![0, 10, 30, 50, 70];

        let mut totals = Vec::new();
        for _ in 0..5 {
            let row = store
                .record_wrong_attempt(3, 9, penalties.clone(), at)
                .await
                .unwrap()
                .expect("attempt below the ceiling");
            totals.push((row.wrong_attempts, row.total_penalty));
        }
        assert_eq!(totals, vec![(1, 0), (2, 10), (3, 40), (4, 90), (5, 160)]);

        let sixth = store
            .record_wrong_attempt(3, 9, penalties, at)
            .await
            .unwrap();
        assert!(sixth.is_none());
        assert_eq!(store.sum_penalties(3).await.unwrap(), 160);
    }

    #[tokio::test]
    async fn slot_rolls_over_once_the_window_elapsed() {
        let store = store().await;
        let start = datetime!(2025-03-01 00:00 UTC);
        let window = Duration::from_secs(10 * 3600);

        for _ in 0..7 {
            store.increment_slot(5, start, window).await.unwrap();
        }
        let slot = store.current_slot(5, start, window).await.unwrap();
        assert_eq!(slot.questions_solved_in_slot, 7);

        let after = datetime!(2025-03-01 10:00:01 UTC);
        let slot = store.current_slot(5, after, window).await.unwrap();
        assert_eq!(slot.questions_solved_in_slot, 0);
        assert_eq!(slot.current_slot_start, after);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_of_many_concurrent_acquirers_wins() {
        let (store, path) = file_store().await;
        let at = datetime!(2025-03-01 12:00 UTC);

        let tasks = (0..32).map(|team_id| {
            let store = store.clone();
            tokio::spawn(async move { store.insert_lock_if_absent(lock(11, team_id, at)).await })
        });
        let acquired = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(acquired, 1);
        assert!(store.find_lock(11).await.unwrap().is_some());

        remove_database(path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_wrong_answers_take_distinct_penalty_slots() {
        let (store, path) = file_store().await;
        let at = datetime!(2025-03-01 12:00 UTC);
        let penalties = vec![0, 10, 30, 50, 70];

        let tasks = (0..16).map(|_| {
            let store = store.clone();
            let penalties = penalties.clone();
            tokio::spawn(async move { store.record_wrong_attempt(6, 2, penalties, at).await })
        });
        let outcomes: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let recorded = outcomes.iter().filter(|row| row.is_some()).count();
        let exhausted = outcomes.iter().filter(|row| row.is_none()).count();
        assert_eq!((recorded, exhausted), (5, 11));
        assert_eq!(store.sum_penalties(6).await.unwrap(), 160);

        remove_database(path);
    }

    #[tokio::test]
    async fn timer_records_whole_seconds_once() {
        let store = store().await;
        assert!(
            store
                .start_timer_if_absent(4, 1, datetime!(2025-03-01 12:00:00 UTC))
                .await
                .unwrap()
        );
        assert!(
            !store
                .start_timer_if_absent(4, 1, datetime!(2025-03-01 12:10:00 UTC))
                .await
                .unwrap()
        );

        let done = store
            .complete_timer(4, 1, datetime!(2025-03-01 12:02:05.900 UTC))
            .await
            .unwrap()
            .expect("running timer");
        assert_eq!(done.time_taken_seconds, Some(125));
        assert!(
            store
                .complete_timer(4, 1, datetime!(2025-03-01 12:30:00 UTC))
                .await
                .unwrap()
                .is_none()
        );

        store
            .start_timer_if_absent(4, 2, datetime!(2025-03-01 12:00:00 UTC))
            .await
            .unwrap();
        assert_eq!(store.sum_solve_seconds(4).await.unwrap(), 125);

        assert!(store.delete_timer(4, 1).await.unwrap());
        assert!(store.find_timer(4, 1).await.unwrap().is_none());
    }
}
