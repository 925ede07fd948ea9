//! In-process [`HuntStore`] backed by concurrent maps.
//!
//! Each primitive runs under the map shard lock of the touched key, which gives the same
//! atomicity as the database backends within one process. Not shared across processes.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use time::OffsetDateTime;

use super::{HuntStore, slot_expired};
use crate::dao::{
    models::{QuestionAttemptEntity, QuestionLockEntity, QuestionTimerEntity, QuotaSlotEntity},
    storage::StorageResult,
};

/// Map-backed store suitable for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct MemoryHuntStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    locks: DashMap<i64, QuestionLockEntity>,
    attempts: DashMap<(i64, i64), QuestionAttemptEntity>,
    slots: DashMap<i64, QuotaSlotEntity>,
    timers: DashMap<(i64, i64), QuestionTimerEntity>,
}

impl MemoryHuntStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryInner {
    fn record_wrong_attempt(
        &self,
        team_id: i64,
        question_id: i64,
        penalties: &[i64],
        now: OffsetDateTime,
    ) -> Option<QuestionAttemptEntity> {
        if penalties.is_empty() {
            return None;
        }
        let mut entry = self
            .attempts
            .entry((team_id, question_id))
            .or_insert_with(|| QuestionAttemptEntity {
                team_id,
                question_id,
                wrong_attempts: 0,
                total_penalty: 0,
                last_attempt_at: now,
            });

        let previous = entry.wrong_attempts as usize;
        let penalty = *penalties.get(previous)?;
        entry.wrong_attempts += 1;
        entry.total_penalty += penalty;
        entry.last_attempt_at = now;
        Some(entry.clone())
    }

    fn roll_slot(
        &self,
        team_id: i64,
        now: OffsetDateTime,
        slot_duration: Duration,
        solved: u32,
    ) -> QuotaSlotEntity {
        let mut slot = self.slots.entry(team_id).or_insert_with(|| QuotaSlotEntity {
            team_id,
            current_slot_start: now,
            questions_solved_in_slot: 0,
        });

        if slot_expired(slot.current_slot_start, now, slot_duration) {
            slot.current_slot_start = now;
            slot.questions_solved_in_slot = 0;
        }
        slot.questions_solved_in_slot += solved;
        slot.clone()
    }
}

impl HuntStore for MemoryHuntStore {
    fn insert_lock_if_absent(
        &self,
        lock: QuestionLockEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inserted = match self.inner.locks.entry(lock.question_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(lock);
                true
            }
        };
        Box::pin(async move { Ok(inserted) })
    }

    fn delete_lock(&self, question_id: i64) -> BoxFuture<'static, StorageResult<bool>> {
        let removed = self.inner.locks.remove(&question_id).is_some();
        Box::pin(async move { Ok(removed) })
    }

    fn delete_lock_held_by(
        &self,
        question_id: i64,
        team_id: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let removed = self
            .inner
            .locks
            .remove_if(&question_id, |_, lock| lock.locked_by_team_id == team_id)
            .is_some();
        Box::pin(async move { Ok(removed) })
    }

    fn delete_stale_lock(
        &self,
        question_id: i64,
        cutoff: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let removed = self
            .inner
            .locks
            .remove_if(&question_id, |_, lock| lock.is_stale(cutoff))
            .is_some();
        Box::pin(async move { Ok(removed) })
    }

    fn delete_stale_locks(&self, cutoff: OffsetDateTime) -> BoxFuture<'static, StorageResult<u64>> {
        let removed = AtomicU64::new(0);
        self.inner.locks.retain(|_, lock| {
            let stale = lock.is_stale(cutoff);
            if stale {
                removed.fetch_add(1, Ordering::Relaxed);
            }
            !stale
        });
        let removed = removed.into_inner();
        Box::pin(async move { Ok(removed) })
    }

    fn find_lock(
        &self,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionLockEntity>>> {
        let lock = self.inner.locks.get(&question_id).map(|lock| lock.clone());
        Box::pin(async move { Ok(lock) })
    }

    fn list_locks(&self) -> BoxFuture<'static, StorageResult<Vec<QuestionLockEntity>>> {
        let mut locks: Vec<_> = self
            .inner
            .locks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        locks.sort_by_key(|lock| lock.question_id);
        Box::pin(async move { Ok(locks) })
    }

    fn find_attempt(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionAttemptEntity>>> {
        let attempt = self
            .inner
            .attempts
            .get(&(team_id, question_id))
            .map(|attempt| attempt.clone());
        Box::pin(async move { Ok(attempt) })
    }

    fn record_wrong_attempt(
        &self,
        team_id: i64,
        question_id: i64,
        penalties: Vec<i64>,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionAttemptEntity>>> {
        let updated = self
            .inner
            .record_wrong_attempt(team_id, question_id, &penalties, now);
        Box::pin(async move { Ok(updated) })
    }

    fn delete_attempts(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let removed = self
            .inner
            .attempts
            .remove(&(team_id, question_id))
            .is_some();
        Box::pin(async move { Ok(removed) })
    }

    fn sum_penalties(&self, team_id: i64) -> BoxFuture<'static, StorageResult<i64>> {
        let total = self
            .inner
            .attempts
            .iter()
            .filter(|entry| entry.key().0 == team_id)
            .map(|entry| entry.total_penalty)
            .sum::<i64>();
        Box::pin(async move { Ok(total) })
    }

    fn current_slot(
        &self,
        team_id: i64,
        now: OffsetDateTime,
        slot_duration: Duration,
    ) -> BoxFuture<'static, StorageResult<QuotaSlotEntity>> {
        let slot = self.inner.roll_slot(team_id, now, slot_duration, 0);
        Box::pin(async move { Ok(slot) })
    }

    fn increment_slot(
        &self,
        team_id: i64,
        now: OffsetDateTime,
        slot_duration: Duration,
    ) -> BoxFuture<'static, StorageResult<QuotaSlotEntity>> {
        let slot = self.inner.roll_slot(team_id, now, slot_duration, 1);
        Box::pin(async move { Ok(slot) })
    }

    fn start_timer_if_absent(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let started = match self.inner.timers.entry((team_id, question_id)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(QuestionTimerEntity::started(team_id, question_id, now));
                true
            }
        };
        Box::pin(async move { Ok(started) })
    }

    fn complete_timer(
        &self,
        team_id: i64,
        question_id: i64,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionTimerEntity>>> {
        let completed = self
            .inner
            .timers
            .get_mut(&(team_id, question_id))
            .filter(|timer| timer.completed_at.is_none())
            .map(|mut timer| {
                timer.complete(now);
                timer.clone()
            });
        Box::pin(async move { Ok(completed) })
    }

    fn find_timer(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionTimerEntity>>> {
        let timer = self
            .inner
            .timers
            .get(&(team_id, question_id))
            .map(|timer| timer.clone());
        Box::pin(async move { Ok(timer) })
    }

    fn delete_timer(
        &self,
        team_id: i64,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let removed = self.inner.timers.remove(&(team_id, question_id)).is_some();
        Box::pin(async move { Ok(removed) })
    }

    fn sum_solve_seconds(&self, team_id: i64) -> BoxFuture<'static, StorageResult<i64>> {
        let total = self
            .inner
            .timers
            .iter()
            .filter(|entry| entry.key().0 == team_id)
            .filter_map(|entry| entry.time_taken_seconds)
            .sum::<i64>();
        Box::pin(async move { Ok(total) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn lock(question_id: i64, team_id: i64, locked_at: OffsetDateTime) -> QuestionLockEntity {
        QuestionLockEntity {
            question_id,
            locked_by_team_id: team_id,
            locked_by_team_name: format!("team-{team_id}"),
            locked_at,
        }
    }

    #[tokio::test]
    async fn conditional_insert_never_overwrites() {
        let store = MemoryHuntStore::new();
        let at = datetime!(2025-03-01 12:00 UTC);

        assert!(store.insert_lock_if_absent(lock(7, 1, at)).await.unwrap());
        assert!(!store.insert_lock_if_absent(lock(7, 2, at)).await.unwrap());

        let holder = store.find_lock(7).await.unwrap().unwrap();
        assert_eq!(holder.locked_by_team_id, 1);
    }

    #[tokio::test]
    async fn held_by_delete_ignores_other_holders() {
        let store = MemoryHuntStore::new();
        let at = datetime!(2025-03-01 12:00 UTC);
        store.insert_lock_if_absent(lock(3, 1, at)).await.unwrap();

        assert!(!store.delete_lock_held_by(3, 2).await.unwrap());
        assert!(store.delete_lock_held_by(3, 1).await.unwrap());
        assert!(store.find_lock(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_attempts_stop_at_the_end_of_the_schedule() {
        let store = MemoryHuntStore::new();
        let at = datetime!(2025-03-01 12:00 UTC);
        let penalties = vec![0, 10];

        let first = store
            .record_wrong_attempt(1, 7, penalties.clone(), at)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((first.wrong_attempts, first.total_penalty), (1, 0));

        let second = store
            .record_wrong_attempt(1, 7, penalties.clone(), at)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((second.wrong_attempts, second.total_penalty), (2, 10));

        assert!(
            store
                .record_wrong_attempt(1, 7, penalties, at)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.sum_penalties(1).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn increment_after_expiry_counts_in_the_new_slot() {
        let store = MemoryHuntStore::new();
        let start = datetime!(2025-03-01 00:00 UTC);
        let hour = Duration::from_secs(3600);

        store.increment_slot(4, start, hour).await.unwrap();
        store.increment_slot(4, start, hour).await.unwrap();

        let later = datetime!(2025-03-01 01:00 UTC);
        let slot = store.increment_slot(4, later, hour).await.unwrap();
        assert_eq!(slot.current_slot_start, later);
        assert_eq!(slot.questions_solved_in_slot, 1);
    }

    #[tokio::test]
    async fn empty_schedule_records_nothing() {
        let store = MemoryHuntStore::new();
        let at = datetime!(2025-03-01 12:00 UTC);

        assert!(
            store
                .record_wrong_attempt(1, 7, Vec::new(), at)
                .await
                .unwrap()
                .is_none()
        );
        assert!(store.find_attempt(1, 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_sweep_counts_each_removed_lock() {
        let store = MemoryHuntStore::new();
        let old = datetime!(2025-03-01 11:00 UTC);
        let fresh = datetime!(2025-03-01 12:00 UTC);
        store.insert_lock_if_absent(lock(1, 1, old)).await.unwrap();
        store.insert_lock_if_absent(lock(2, 2, old)).await.unwrap();
        store.insert_lock_if_absent(lock(3, 3, fresh)).await.unwrap();

        let removed = store
            .delete_stale_locks(datetime!(2025-03-01 11:30 UTC))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list_locks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn timer_keeps_first_start_and_stops_once() {
        let store = MemoryHuntStore::new();
        let opened = datetime!(2025-03-01 12:00 UTC);

        assert!(store.start_timer_if_absent(2, 7, opened).await.unwrap());
        assert!(
            !store
                .start_timer_if_absent(2, 7, datetime!(2025-03-01 12:05 UTC))
                .await
                .unwrap()
        );

        let stopped = store
            .complete_timer(2, 7, datetime!(2025-03-01 12:01:30 UTC))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stopped.started_at, opened);
        assert_eq!(stopped.time_taken_seconds, Some(90));
        assert!(
            store
                .complete_timer(2, 7, datetime!(2025-03-01 13:00 UTC))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.sum_solve_seconds(2).await.unwrap(), 90);
    }
}
