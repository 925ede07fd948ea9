//! Wrong-answer counters and the escalating penalty schedule.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;

use crate::{
    clock::SharedClock,
    dao::{hunt_store::HuntStore, storage::StorageResult},
};

/// Escalating penalties, in percent of a question's points, one entry per allowed wrong answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PenaltySchedule {
    percentages: Vec<u8>,
}

impl PenaltySchedule {
    pub fn new(percentages: Vec<u8>) -> Self {
        Self { percentages }
    }

    /// Wrong answers accepted before a (team, question) pair is exhausted.
    pub fn max_attempts(&self) -> u32 {
        self.percentages.len() as u32
    }

    /// Penalty charged for the wrong answer following `previous` earlier ones, truncated.
    pub fn penalty_for(&self, previous: u32, points: i64) -> i64 {
        self.percentages
            .get(previous as usize)
            .map(|percent| points * i64::from(*percent) / 100)
            .unwrap_or(0)
    }

    /// Absolute penalties for a question worth `points`.
    pub fn penalties(&self, points: i64) -> Vec<i64> {
        (0..self.max_attempts())
            .map(|previous| self.penalty_for(previous, points))
            .collect()
    }
}

impl Default for PenaltySchedule {
    fn default() -> Self {
        Self::new(vec![0, 10, 30, 50, 70])
    }
}

/// Attempt standing of a team on one question; zero-valued before the first wrong answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptSummary {
    pub wrong_attempts: u32,
    pub total_penalty: i64,
    pub last_attempt_at: Option<OffsetDateTime>,
}

/// Result of [`AttemptTracker::record_wrong_attempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrongAttemptOutcome {
    /// The answer was counted.
    Recorded {
        penalty_this_attempt: i64,
        attempts_remaining: u32,
        wrong_attempts: u32,
        total_penalty: i64,
    },
    /// The ceiling was already reached; nothing was written.
    Exhausted,
}

impl WrongAttemptOutcome {
    /// Whether this answer used up the last allowed attempt, or none was left.
    pub fn exhausts(&self) -> bool {
        match self {
            WrongAttemptOutcome::Recorded {
                attempts_remaining, ..
            } => *attempts_remaining == 0,
            WrongAttemptOutcome::Exhausted => true,
        }
    }
}

/// Records wrong answers and derives penalties and exhaustion from them.
#[derive(Clone)]
pub struct AttemptTracker {
    store: Arc<dyn HuntStore>,
    clock: SharedClock,
    schedule: PenaltySchedule,
}

impl AttemptTracker {
    pub fn new(store: Arc<dyn HuntStore>, clock: SharedClock, schedule: PenaltySchedule) -> Self {
        Self {
            store,
            clock,
            schedule,
        }
    }

    pub async fn get_attempts(&self, team_id: i64, question_id: i64) -> StorageResult<AttemptSummary> {
        let attempt = self.store.find_attempt(team_id, question_id).await?;
        Ok(attempt
            .map(|row| AttemptSummary {
                wrong_attempts: row.wrong_attempts,
                total_penalty: row.total_penalty,
                last_attempt_at: Some(row.last_attempt_at),
            })
            .unwrap_or_default())
    }

    /// Count one wrong answer on a question worth `question_points`.
    ///
    /// The increment, the penalty lookup and the ceiling check are one atomic store operation,
    /// so concurrent submissions can neither lose an update nor both be charged the same slot.
    pub async fn record_wrong_attempt(
        &self,
        team_id: i64,
        question_id: i64,
        question_points: i64,
    ) -> StorageResult<WrongAttemptOutcome> {
        let penalties = self.schedule.penalties(question_points);
        let updated = self
            .store
            .record_wrong_attempt(team_id, question_id, penalties, self.clock.now())
            .await?;

        let Some(row) = updated else {
            return Ok(WrongAttemptOutcome::Exhausted);
        };

        let penalty_this_attempt = self
            .schedule
            .penalty_for(row.wrong_attempts.saturating_sub(1), question_points);
        let attempts_remaining = self.schedule.max_attempts().saturating_sub(row.wrong_attempts);
        info!(
            team_id,
            question_id,
            wrong_attempts = row.wrong_attempts,
            penalty = penalty_this_attempt,
            attempts_remaining,
            "recorded wrong attempt"
        );

        Ok(WrongAttemptOutcome::Recorded {
            penalty_this_attempt,
            attempts_remaining,
            wrong_attempts: row.wrong_attempts,
            total_penalty: row.total_penalty,
        })
    }

    pub async fn is_exhausted(&self, team_id: i64, question_id: i64) -> StorageResult<bool> {
        let summary = self.get_attempts(team_id, question_id).await?;
        Ok(summary.wrong_attempts >= self.schedule.max_attempts())
    }

    /// Sum of penalties across every question, for net-score computation.
    pub async fn total_penalty(&self, team_id: i64) -> StorageResult<i64> {
        self.store.sum_penalties(team_id).await
    }

    /// Forget a team's standing on a question. Returns whether anything was recorded.
    pub async fn reset(&self, team_id: i64, question_id: i64) -> StorageResult<bool> {
        self.store.delete_attempts(team_id, question_id).await
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::{clock::ManualClock, dao::hunt_store::memory::MemoryHuntStore};

    fn tracker() -> AttemptTracker {
        AttemptTracker::new(
            Arc::new(MemoryHuntStore::new()),
            Arc::new(ManualClock::new(datetime!(2025-03-01 12:00 UTC))),
            PenaltySchedule::default(),
        )
    }

    #[test]
    fn penalties_truncate_toward_zero() {
        let schedule = PenaltySchedule::default();
        assert_eq!(schedule.penalties(100), vec![0, 10, 30, 50, 70]);
        assert_eq!(schedule.penalties(15), vec![0, 1, 4, 7, 10]);
    }

    #[tokio::test]
    async fn unknown_pair_reads_as_zero() {
        let summary = tracker().get_attempts(1, 1).await.unwrap();
        assert_eq!(summary, AttemptSummary::default());
    }

    #[tokio::test]
    async fn successive_wrong_answers_escalate_until_exhausted() {
        let tracker = tracker();

        let mut seen = Vec::new();
        for _ in 0..5 {
            match tracker.record_wrong_attempt(2, 7, 100).await.unwrap() {
                WrongAttemptOutcome::Recorded {
                    penalty_this_attempt,
                    attempts_remaining,
                    ..
                } => seen.push((penalty_this_attempt, attempts_remaining)),
                WrongAttemptOutcome::Exhausted => panic!("exhausted too early"),
            }
        }
        assert_eq!(seen, vec![(0, 4), (10, 3), (30, 2), (50, 1), (70, 0)]);

        assert!(tracker.is_exhausted(2, 7).await.unwrap());
        assert_eq!(
            tracker.record_wrong_attempt(2, 7, 100).await.unwrap(),
            WrongAttemptOutcome::Exhausted
        );
        assert_eq!(tracker.total_penalty(2).await.unwrap(), 160);
    }

    #[tokio::test]
    async fn concurrent_submissions_are_charged_distinct_slots() {
        let tracker = tracker();
        let tasks = (0..8).map(|_| {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.record_wrong_attempt(4, 9, 100).await })
        });
        let outcomes: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let recorded = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, WrongAttemptOutcome::Recorded { .. }))
            .count();
        assert_eq!(recorded, 5);
        assert_eq!(tracker.total_penalty(4).await.unwrap(), 160);
    }

    #[tokio::test]
    async fn reset_clears_the_pair() {
        let tracker = tracker();
        tracker.record_wrong_attempt(1, 3, 100).await.unwrap();
        tracker.record_wrong_attempt(1, 3, 100).await.unwrap();

        assert!(tracker.reset(1, 3).await.unwrap());
        assert_eq!(tracker.get_attempts(1, 3).await.unwrap().wrong_attempts, 0);
        assert_eq!(tracker.total_penalty(1).await.unwrap(), 0);
    }
}
