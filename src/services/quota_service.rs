//! Rolling solve quota per team.
//!
//! Windows are evaluated lazily: every read rolls an elapsed window over in the store, so no
//! timer is needed.

use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tracing::info;

use crate::{
    clock::SharedClock,
    dao::{hunt_store::HuntStore, models::QuotaSlotEntity, storage::StorageResult},
};

/// A team's current quota window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSlot {
    pub team_id: i64,
    pub current_slot_start: OffsetDateTime,
    pub questions_solved_in_slot: u32,
    pub slot_duration: Duration,
}

impl QuotaSlot {
    fn from_entity(entity: QuotaSlotEntity, slot_duration: Duration) -> Self {
        Self {
            team_id: entity.team_id,
            current_slot_start: entity.current_slot_start,
            questions_solved_in_slot: entity.questions_solved_in_slot,
            slot_duration,
        }
    }

    /// `max(0, slot_duration - (now - current_slot_start))`.
    pub fn time_until_reset(&self, now: OffsetDateTime) -> Duration {
        let elapsed = now - self.current_slot_start;
        let elapsed = Duration::try_from(elapsed).unwrap_or(Duration::ZERO);
        self.slot_duration.saturating_sub(elapsed)
    }

    /// Remaining time rendered as `"3h 12m"`.
    pub fn describe_reset(&self, now: OffsetDateTime) -> String {
        let minutes = self.time_until_reset(now).as_secs() / 60;
        format!("{}h {}m", minutes / 60, minutes % 60)
    }
}

/// Result of [`QuotaTracker::can_solve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub slot: QuotaSlot,
}

/// Caps confirmed solves per team inside a rolling window.
#[derive(Clone)]
pub struct QuotaTracker {
    store: Arc<dyn HuntStore>,
    clock: SharedClock,
    limit: u32,
    slot_duration: Duration,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn HuntStore>, clock: SharedClock, limit: u32, slot_duration: Duration) -> Self {
        Self {
            store,
            clock,
            limit,
            slot_duration,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Current window of `team_id`, created or rolled over as needed.
    pub async fn get_slot(&self, team_id: i64) -> StorageResult<QuotaSlot> {
        let entity = self
            .store
            .current_slot(team_id, self.clock.now(), self.slot_duration)
            .await?;
        Ok(QuotaSlot::from_entity(entity, self.slot_duration))
    }

    pub async fn can_solve(&self, team_id: i64) -> StorageResult<QuotaCheck> {
        let slot = self.get_slot(team_id).await?;
        Ok(QuotaCheck {
            allowed: slot.questions_solved_in_slot < self.limit,
            slot,
        })
    }

    /// Count one confirmed solve. Call once per solve, after it is recorded.
    pub async fn increment_count(&self, team_id: i64) -> StorageResult<QuotaSlot> {
        let entity = self
            .store
            .increment_slot(team_id, self.clock.now(), self.slot_duration)
            .await?;
        info!(
            team_id,
            solved = entity.questions_solved_in_slot,
            limit = self.limit,
            "incremented quota count"
        );
        Ok(QuotaSlot::from_entity(entity, self.slot_duration))
    }

    pub async fn time_until_reset(&self, team_id: i64) -> StorageResult<Duration> {
        let slot = self.get_slot(team_id).await?;
        Ok(slot.time_until_reset(self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::{clock::ManualClock, dao::hunt_store::memory::MemoryHuntStore};

    const TEN_HOURS: Duration = Duration::from_secs(10 * 3600);

    fn tracker(limit: u32) -> (QuotaTracker, ManualClock) {
        let clock = ManualClock::new(datetime!(2025-03-01 08:00 UTC));
        let tracker = QuotaTracker::new(
            Arc::new(MemoryHuntStore::new()),
            Arc::new(clock.clone()),
            limit,
            TEN_HOURS,
        );
        (tracker, clock)
    }

    #[tokio::test]
    async fn limit_blocks_further_solves() {
        let (tracker, _) = tracker(2);
        assert!(tracker.can_solve(1).await.unwrap().allowed);

        tracker.increment_count(1).await.unwrap();
        tracker.increment_count(1).await.unwrap();

        let check = tracker.can_solve(1).await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.slot.questions_solved_in_slot, 2);
    }

    #[tokio::test]
    async fn elapsed_window_rolls_over_on_read() {
        let (tracker, clock) = tracker(10);
        for _ in 0..7 {
            tracker.increment_count(3).await.unwrap();
        }

        clock.advance(TEN_HOURS + Duration::from_secs(1));
        let slot = tracker.get_slot(3).await.unwrap();
        assert_eq!(slot.questions_solved_in_slot, 0);
        assert_eq!(slot.current_slot_start, datetime!(2025-03-01 18:00:01 UTC));
    }

    #[tokio::test]
    async fn reset_time_counts_down_from_slot_start() {
        let (tracker, clock) = tracker(10);
        tracker.get_slot(5).await.unwrap();

        clock.advance(Duration::from_secs(6 * 3600 + 48 * 60));
        assert_eq!(
            tracker.time_until_reset(5).await.unwrap(),
            Duration::from_secs(3 * 3600 + 12 * 60)
        );

        let slot = tracker.get_slot(5).await.unwrap();
        assert_eq!(slot.describe_reset(tracker.now()), "3h 12m");
    }

    #[test]
    fn reset_time_never_goes_negative() {
        let slot = QuotaSlot {
            team_id: 1,
            current_slot_start: datetime!(2025-03-01 00:00 UTC),
            questions_solved_in_slot: 0,
            slot_duration: Duration::from_secs(60),
        };
        assert_eq!(
            slot.time_until_reset(datetime!(2025-03-01 01:00 UTC)),
            Duration::ZERO
        );
    }
}
