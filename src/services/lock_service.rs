//! Exclusive per-question locks.
//!
//! The manager keeps no state of its own: every decision is a single conditional write in
//! the [`HuntStore`], so any number of processes may share a store.

use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    clock::SharedClock,
    dao::{hunt_store::HuntStore, models::QuestionLockEntity, storage::StorageResult},
};

/// Result of [`LockManager::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller now holds the lock.
    Acquired(QuestionLockEntity),
    /// Another holder was already present; `holder` is `None` if it vanished in the meantime.
    AlreadyLocked {
        holder: Option<QuestionLockEntity>,
    },
}

/// Grants and reclaims question locks.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn HuntStore>,
    clock: SharedClock,
    staleness: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn HuntStore>, clock: SharedClock, staleness: Duration) -> Self {
        Self {
            store,
            clock,
            staleness,
        }
    }

    /// Locks taken at or before this instant are abandoned.
    fn stale_cutoff(&self) -> OffsetDateTime {
        self.clock.now() - self.staleness
    }

    /// Insert the lock iff the question has no live lock.
    ///
    /// A stale lock on the question is purged first so an abandoned claim cannot block the
    /// caller. Storage errors propagate and never count as an acquisition.
    pub async fn try_acquire(
        &self,
        question_id: i64,
        team_id: i64,
        team_name: &str,
    ) -> StorageResult<AcquireOutcome> {
        let now = self.clock.now();
        if self
            .store
            .delete_stale_lock(question_id, now - self.staleness)
            .await?
        {
            info!(question_id, "reclaimed stale lock before acquisition");
        }

        let lock = QuestionLockEntity {
            question_id,
            locked_by_team_id: team_id,
            locked_by_team_name: team_name.to_owned(),
            locked_at: now,
        };

        if self.store.insert_lock_if_absent(lock.clone()).await? {
            debug!(question_id, team_id, "lock acquired");
            return Ok(AcquireOutcome::Acquired(lock));
        }

        let holder = self.store.find_lock(question_id).await?;
        debug!(question_id, team_id, holder = ?holder.as_ref().map(|h| h.locked_by_team_id), "lock contended");
        Ok(AcquireOutcome::AlreadyLocked { holder })
    }

    /// Remove the lock on `question_id`. Idempotent; storage errors are logged and reported as
    /// `false` since the sweep reclaims the lock later anyway.
    pub async fn release(&self, question_id: i64) -> bool {
        match self.store.delete_lock(question_id).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(question_id, error = %err, "failed to release lock");
                false
            }
        }
    }

    /// Remove the lock on `question_id` only if `team_id` holds it.
    pub async fn release_held_by(&self, question_id: i64, team_id: i64) -> bool {
        match self.store.delete_lock_held_by(question_id, team_id).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(question_id, team_id, error = %err, "failed to release team lock");
                false
            }
        }
    }

    /// Current holder of `question_id`, never reporting a lock past the staleness threshold.
    pub async fn is_locked(&self, question_id: i64) -> StorageResult<Option<QuestionLockEntity>> {
        let cutoff = self.stale_cutoff();
        self.store.delete_stale_lock(question_id, cutoff).await?;
        let lock = self.store.find_lock(question_id).await?;
        Ok(lock.filter(|lock| !lock.is_stale(cutoff)))
    }

    /// Every live lock, ordered by question id.
    pub async fn list_locked(&self) -> StorageResult<Vec<QuestionLockEntity>> {
        let cutoff = self.stale_cutoff();
        self.store.delete_stale_locks(cutoff).await?;
        let mut locks = self.store.list_locks().await?;
        locks.retain(|lock| !lock.is_stale(cutoff));
        Ok(locks)
    }

    /// Remove every stale lock, returning how many were reclaimed.
    pub async fn cleanup_stale(&self) -> StorageResult<u64> {
        self.store.delete_stale_locks(self.stale_cutoff()).await
    }
}
