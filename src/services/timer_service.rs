//! Per-question solve timers used to break score ties.

use std::{sync::Arc, time::Duration};

use tracing::{debug, info};

use crate::{
    clock::SharedClock,
    dao::{hunt_store::HuntStore, storage::StorageResult},
};

/// Starts a timer the first time a team opens a question and stops it when the team solves it.
#[derive(Clone)]
pub struct SolveTimer {
    store: Arc<dyn HuntStore>,
    clock: SharedClock,
}

impl SolveTimer {
    pub fn new(store: Arc<dyn HuntStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Start the timer unless one already runs or completed for the pair.
    pub async fn start(&self, team_id: i64, question_id: i64) -> StorageResult<bool> {
        let started = self
            .store
            .start_timer_if_absent(team_id, question_id, self.clock.now())
            .await?;
        if started {
            debug!(team_id, question_id, "solve timer started");
        }
        Ok(started)
    }

    /// Stop the running timer and return the time taken; `None` when no timer was running.
    pub async fn stop(&self, team_id: i64, question_id: i64) -> StorageResult<Option<Duration>> {
        let completed = self
            .store
            .complete_timer(team_id, question_id, self.clock.now())
            .await?;
        let taken = completed
            .and_then(|timer| timer.time_taken_seconds)
            .map(seconds);
        if let Some(taken) = taken {
            info!(team_id, question_id, seconds = taken.as_secs(), "solve timer stopped");
        }
        Ok(taken)
    }

    /// Time taken on one question, zero until it was solved.
    pub async fn question_solve_time(&self, team_id: i64, question_id: i64) -> StorageResult<Duration> {
        let timer = self.store.find_timer(team_id, question_id).await?;
        Ok(timer
            .and_then(|timer| timer.time_taken_seconds)
            .map(seconds)
            .unwrap_or_default())
    }

    /// Time taken across every solved question.
    pub async fn total_solve_time(&self, team_id: i64) -> StorageResult<Duration> {
        self.store.sum_solve_seconds(team_id).await.map(seconds)
    }

    /// Forget the pair's timer so the next opening starts afresh.
    pub async fn reset(&self, team_id: i64, question_id: i64) -> StorageResult<bool> {
        self.store.delete_timer(team_id, question_id).await
    }
}

fn seconds(value: i64) -> Duration {
    Duration::from_secs(u64::try_from(value).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::{clock::ManualClock, dao::hunt_store::memory::MemoryHuntStore};

    fn timer() -> (SolveTimer, ManualClock) {
        let clock = ManualClock::new(datetime!(2025-03-01 12:00 UTC));
        let timer = SolveTimer::new(Arc::new(MemoryHuntStore::new()), Arc::new(clock.clone()));
        (timer, clock)
    }

    #[tokio::test]
    async fn reopening_does_not_restart_the_clock() {
        let (timer, clock) = timer();
        assert!(timer.start(1, 7).await.unwrap());

        clock.advance(Duration::from_secs(40));
        assert!(!timer.start(1, 7).await.unwrap());

        clock.advance(Duration::from_secs(20));
        assert_eq!(timer.stop(1, 7).await.unwrap(), Some(Duration::from_secs(60)));
        assert_eq!(
            timer.question_solve_time(1, 7).await.unwrap(),
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn total_counts_only_solved_questions() {
        let (timer, clock) = timer();
        timer.start(1, 1).await.unwrap();
        timer.start(1, 2).await.unwrap();
        timer.start(2, 1).await.unwrap();

        clock.advance(Duration::from_secs(90));
        timer.stop(1, 1).await.unwrap();
        timer.stop(2, 1).await.unwrap();

        assert_eq!(timer.total_solve_time(1).await.unwrap(), Duration::from_secs(90));
        assert_eq!(timer.question_solve_time(1, 2).await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn stopping_without_a_start_is_a_no_op() {
        let (timer, _) = timer();
        assert_eq!(timer.stop(3, 3).await.unwrap(), None);
        assert_eq!(timer.total_solve_time(3).await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn reset_lets_the_next_opening_start_afresh() {
        let (timer, clock) = timer();
        timer.start(1, 4).await.unwrap();
        clock.advance(Duration::from_secs(300));

        assert!(timer.reset(1, 4).await.unwrap());
        assert!(timer.start(1, 4).await.unwrap());
        clock.advance(Duration::from_secs(5));
        assert_eq!(timer.stop(1, 4).await.unwrap(), Some(Duration::from_secs(5)));
    }
}
