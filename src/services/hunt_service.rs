//! Request flows tying quota, locks, attempts and events together.
//!
//! Answer checking and point bookkeeping stay with the caller; these functions only decide
//! who may touch a question and tell every viewer about it.

use std::time::Duration;

use tracing::{info, warn};

use crate::{
    dao::models::QuestionLockEntity,
    dto::events::{
        EventPayload, LeaderboardUpdateEvent, QuestionLockedEvent, QuestionSolvedEvent,
        QuestionUnlockedEvent, UnlockReason,
    },
    error::ServiceError,
    services::{attempt_service::WrongAttemptOutcome, lock_service::AcquireOutcome},
    state::SharedState,
};

/// Team acting on a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamRef {
    pub id: i64,
    pub name: String,
}

impl TeamRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Why a team may not solve another question right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDenial {
    pub solved: u32,
    pub limit: u32,
    pub resets_in: Duration,
    /// Ready-to-show explanation including the time until the next window.
    pub message: String,
}

/// Result of [`open_question`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The team holds the lock; `newly_acquired` is false when it already held it.
    Opened {
        lock: QuestionLockEntity,
        newly_acquired: bool,
    },
    /// The team's quota window is spent.
    QuotaExhausted(QuotaDenial),
    /// The team used every allowed wrong answer on this question.
    AttemptsExhausted,
    /// Another team is working on the question.
    LockedByOther {
        holder_name: Option<String>,
    },
}

/// Result of [`submit_verdict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Correct answer; the lock was released and the solve counted against the quota.
    /// `solve_time` is `None` when no timer was running for the pair.
    Solved { solve_time: Option<Duration> },
    /// Wrong answer counted; `exhausted` is true when it was the last one allowed.
    Wrong {
        penalty_this_attempt: i64,
        attempts_remaining: u32,
        exhausted: bool,
    },
    /// No attempt left; nothing was recorded.
    AttemptsExhausted,
    /// Another team holds the question; nothing was recorded.
    LockedByOther { holder_name: String },
    /// A correct answer arrived after the quota window filled up; nothing was recorded.
    QuotaExhausted(QuotaDenial),
}

async fn quota_denial(
    state: &SharedState,
    team_id: i64,
) -> Result<Option<QuotaDenial>, ServiceError> {
    let quota = state.quota().can_solve(team_id).await?;
    if quota.allowed {
        return Ok(None);
    }
    let now = state.clock().now();
    let limit = state.quota().limit();
    let message = format!(
        "Question quota exhausted! You've solved {}/{} questions in this slot. New slot starts in {}",
        quota.slot.questions_solved_in_slot,
        limit,
        quota.slot.describe_reset(now)
    );
    Ok(Some(QuotaDenial {
        solved: quota.slot.questions_solved_in_slot,
        limit,
        resets_in: quota.slot.time_until_reset(now),
        message,
    }))
}

async fn start_timer(state: &SharedState, team_id: i64, question_id: i64) {
    if let Err(err) = state.timers().start(team_id, question_id).await {
        warn!(team_id, question_id, error = %err, "failed to start solve timer");
    }
}

/// Let `team` start working on `question_id`.
pub async fn open_question(
    state: &SharedState,
    team: &TeamRef,
    question_id: i64,
) -> Result<OpenOutcome, ServiceError> {
    if let Some(denial) = quota_denial(state, team.id).await? {
        return Ok(OpenOutcome::QuotaExhausted(denial));
    }

    if state.attempts().is_exhausted(team.id, question_id).await? {
        return Ok(OpenOutcome::AttemptsExhausted);
    }

    if let Some(holder) = state.locks().is_locked(question_id).await? {
        if holder.locked_by_team_id == team.id {
            start_timer(state, team.id, question_id).await;
            return Ok(OpenOutcome::Opened {
                lock: holder,
                newly_acquired: false,
            });
        }
        return Ok(OpenOutcome::LockedByOther {
            holder_name: Some(holder.locked_by_team_name),
        });
    }

    match state
        .locks()
        .try_acquire(question_id, team.id, &team.name)
        .await?
    {
        AcquireOutcome::Acquired(lock) => {
            info!(question_id, team_id = team.id, "question opened");
            state
                .broadcaster()
                .broadcast(EventPayload::QuestionLocked(QuestionLockedEvent {
                    question_id,
                    team_id: team.id,
                    team_name: team.name.clone(),
                }))
                .await;
            start_timer(state, team.id, question_id).await;
            Ok(OpenOutcome::Opened {
                lock,
                newly_acquired: true,
            })
        }
        AcquireOutcome::AlreadyLocked { holder: Some(holder) } if holder.locked_by_team_id == team.id => {
            start_timer(state, team.id, question_id).await;
            Ok(OpenOutcome::Opened {
                lock: holder,
                newly_acquired: false,
            })
        }
        AcquireOutcome::AlreadyLocked { holder } => Ok(OpenOutcome::LockedByOther {
            holder_name: holder.map(|holder| holder.locked_by_team_name),
        }),
    }
}

/// Apply the caller's verdict on `team`'s answer to a question worth `points`.
///
/// Only the lock holder may answer; a question with no live lock accepts answers from any team.
pub async fn submit_verdict(
    state: &SharedState,
    team: &TeamRef,
    question_id: i64,
    points: i64,
    correct: bool,
) -> Result<SubmissionOutcome, ServiceError> {
    if points < 0 {
        return Err(ServiceError::InvalidInput(format!(
            "question points must not be negative (got {points})"
        )));
    }
    if let Some(holder) = state.locks().is_locked(question_id).await?
        && holder.locked_by_team_id != team.id
    {
        return Ok(SubmissionOutcome::LockedByOther {
            holder_name: holder.locked_by_team_name,
        });
    }
    if state.attempts().is_exhausted(team.id, question_id).await? {
        return Ok(SubmissionOutcome::AttemptsExhausted);
    }

    if correct {
        if let Some(denial) = quota_denial(state, team.id).await? {
            return Ok(SubmissionOutcome::QuotaExhausted(denial));
        }
        if let Err(err) = state.quota().increment_count(team.id).await {
            warn!(team_id = team.id, error = %err, "failed to count solve against quota");
        }
        let solve_time = match state.timers().stop(team.id, question_id).await {
            Ok(taken) => taken,
            Err(err) => {
                warn!(team_id = team.id, question_id, error = %err, "failed to stop solve timer");
                None
            }
        };
        state.locks().release_held_by(question_id, team.id).await;

        let broadcaster = state.broadcaster();
        broadcaster
            .broadcast(EventPayload::QuestionUnlocked(QuestionUnlockedEvent {
                question_id,
                reason: Some(UnlockReason::Solved),
            }))
            .await;
        broadcaster
            .broadcast(EventPayload::QuestionSolved(QuestionSolvedEvent {
                question_id,
                team_id: team.id,
                team_name: team.name.clone(),
                points,
            }))
            .await;
        broadcaster
            .broadcast(EventPayload::LeaderboardUpdate(LeaderboardUpdateEvent::default()))
            .await;
        info!(question_id, team_id = team.id, points, "question solved");
        return Ok(SubmissionOutcome::Solved { solve_time });
    }

    let outcome = state
        .attempts()
        .record_wrong_attempt(team.id, question_id, points)
        .await?;
    let WrongAttemptOutcome::Recorded {
        penalty_this_attempt,
        attempts_remaining,
        ..
    } = outcome
    else {
        return Ok(SubmissionOutcome::AttemptsExhausted);
    };

    let exhausted = attempts_remaining == 0;
    if exhausted {
        state.locks().release_held_by(question_id, team.id).await;
        state
            .broadcaster()
            .broadcast(EventPayload::QuestionUnlocked(QuestionUnlockedEvent {
                question_id,
                reason: Some(UnlockReason::MaxAttemptsReached),
            }))
            .await;
        info!(question_id, team_id = team.id, "attempts exhausted; question released");
    }

    Ok(SubmissionOutcome::Wrong {
        penalty_this_attempt,
        attempts_remaining,
        exhausted,
    })
}

/// Reset `team_id`'s attempts and solve timer on a question and drop its lock there.
///
/// Returns whether anything was cleared.
pub async fn admin_unlock_for_team(
    state: &SharedState,
    team_id: i64,
    question_id: i64,
) -> Result<bool, ServiceError> {
    let attempts_cleared = state.attempts().reset(team_id, question_id).await?;
    state.timers().reset(team_id, question_id).await?;
    let lock_released = state.locks().release_held_by(question_id, team_id).await;

    if lock_released {
        broadcast_admin_unlock(state, question_id).await;
    }
    info!(
        team_id,
        question_id, attempts_cleared, lock_released, "admin unlocked question for team"
    );
    Ok(attempts_cleared || lock_released)
}

/// Remove whichever lock is held on `question_id`. Returns whether a lock existed.
pub async fn admin_force_release(state: &SharedState, question_id: i64) -> bool {
    let released = state.locks().release(question_id).await;
    if released {
        broadcast_admin_unlock(state, question_id).await;
        info!(question_id, "admin released question lock");
    }
    released
}

async fn broadcast_admin_unlock(state: &SharedState, question_id: i64) {
    state
        .broadcaster()
        .broadcast(EventPayload::QuestionUnlocked(QuestionUnlockedEvent {
            question_id,
            reason: Some(UnlockReason::AdminOverride),
        }))
        .await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        clock::ManualClock,
        config::AppConfig,
        dao::hunt_store::memory::MemoryHuntStore,
        dto::events::Event,
        services::broadcaster::Client,
        state::AppState,
    };

    async fn state_with(config: AppConfig) -> (SharedState, ManualClock) {
        let clock = ManualClock::new(datetime!(2025-03-01 12:00 UTC));
        let state = AppState::build(
            config,
            Arc::new(MemoryHuntStore::new()),
            Arc::new(clock.clone()),
            None,
        )
        .await;
        (state, clock)
    }

    async fn next_event(client: &mut Client) -> Event {
        timeout(Duration::from_secs(1), client.recv())
            .await
            .expect("event within a second")
            .expect("queue open")
    }

    fn unlocked(question_id: i64, reason: UnlockReason) -> EventPayload {
        EventPayload::QuestionUnlocked(QuestionUnlockedEvent {
            question_id,
            reason: Some(reason),
        })
    }

    #[tokio::test]
    async fn second_team_is_told_who_holds_the_question() {
        let (state, _) = state_with(AppConfig::default()).await;
        let mut viewer = state.broadcaster().register_client("viewer").await.unwrap();
        let owls = TeamRef::new(1, "Owls");
        let foxes = TeamRef::new(2, "Foxes");

        let opened = open_question(&state, &owls, 7).await.unwrap();
        assert!(matches!(opened, OpenOutcome::Opened { newly_acquired: true, .. }));
        assert_eq!(
            next_event(&mut viewer).await.payload,
            EventPayload::QuestionLocked(QuestionLockedEvent {
                question_id: 7,
                team_id: 1,
                team_name: "Owls".into(),
            })
        );

        let rejected = open_question(&state, &foxes, 7).await.unwrap();
        assert_eq!(
            rejected,
            OpenOutcome::LockedByOther {
                holder_name: Some("Owls".into())
            }
        );

        let reopened = open_question(&state, &owls, 7).await.unwrap();
        assert!(matches!(reopened, OpenOutcome::Opened { newly_acquired: false, .. }));
        assert!(viewer.try_recv().is_none());
    }

    #[tokio::test]
    async fn correct_verdict_releases_and_announces_the_solve() {
        let (state, _) = state_with(AppConfig::default()).await;
        let mut viewer = state.broadcaster().register_client("viewer").await.unwrap();
        let owls = TeamRef::new(1, "Owls");

        open_question(&state, &owls, 7).await.unwrap();
        next_event(&mut viewer).await;

        let outcome = submit_verdict(&state, &owls, 7, 100, true).await.unwrap();
        assert_eq!(
            outcome,
            SubmissionOutcome::Solved {
                solve_time: Some(Duration::ZERO)
            }
        );

        assert_eq!(
            next_event(&mut viewer).await.payload,
            unlocked(7, UnlockReason::Solved)
        );
        assert_eq!(
            next_event(&mut viewer).await.payload,
            EventPayload::QuestionSolved(QuestionSolvedEvent {
                question_id: 7,
                team_id: 1,
                team_name: "Owls".into(),
                points: 100,
            })
        );
        assert_eq!(
            next_event(&mut viewer).await.payload,
            EventPayload::LeaderboardUpdate(LeaderboardUpdateEvent::default())
        );

        assert!(state.locks().is_locked(7).await.unwrap().is_none());
        assert_eq!(
            state.quota().get_slot(1).await.unwrap().questions_solved_in_slot,
            1
        );
    }

    #[tokio::test]
    async fn last_wrong_answer_releases_the_question() {
        let (state, _) = state_with(AppConfig::default()).await;
        let mut viewer = state.broadcaster().register_client("viewer").await.unwrap();
        let owls = TeamRef::new(1, "Owls");

        open_question(&state, &owls, 7).await.unwrap();
        next_event(&mut viewer).await;

        let mut penalties = Vec::new();
        for _ in 0..5 {
            match submit_verdict(&state, &owls, 7, 100, false).await.unwrap() {
                SubmissionOutcome::Wrong {
                    penalty_this_attempt,
                    ..
                } => penalties.push(penalty_this_attempt),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(penalties, vec![0, 10, 30, 50, 70]);
        assert_eq!(state.attempts().total_penalty(1).await.unwrap(), 160);

        assert_eq!(
            next_event(&mut viewer).await.payload,
            unlocked(7, UnlockReason::MaxAttemptsReached)
        );
        assert!(state.locks().is_locked(7).await.unwrap().is_none());

        assert_eq!(
            submit_verdict(&state, &owls, 7, 100, false).await.unwrap(),
            SubmissionOutcome::AttemptsExhausted
        );
        assert_eq!(
            open_question(&state, &owls, 7).await.unwrap(),
            OpenOutcome::AttemptsExhausted
        );
    }

    #[tokio::test]
    async fn spent_quota_blocks_opening_until_the_window_rolls_over() {
        let config = AppConfig {
            quota_limit: 1,
            ..AppConfig::default()
        };
        let (state, clock) = state_with(config).await;
        let owls = TeamRef::new(1, "Owls");

        open_question(&state, &owls, 7).await.unwrap();
        submit_verdict(&state, &owls, 7, 100, true).await.unwrap();

        clock.advance(Duration::from_secs(60 * 60));
        match open_question(&state, &owls, 8).await.unwrap() {
            OpenOutcome::QuotaExhausted(QuotaDenial {
                solved,
                limit,
                resets_in,
                message,
            }) => {
                assert_eq!((solved, limit), (1, 1));
                assert_eq!(resets_in, Duration::from_secs(9 * 60 * 60));
                assert!(message.contains("1/1"));
                assert!(message.ends_with("9h 0m"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        clock.advance(Duration::from_secs(9 * 60 * 60));
        assert!(matches!(
            open_question(&state, &owls, 8).await.unwrap(),
            OpenOutcome::Opened { .. }
        ));
    }

    #[tokio::test]
    async fn admin_unlock_clears_attempts_and_lock() {
        let (state, _) = state_with(AppConfig::default()).await;
        let mut viewer = state.broadcaster().register_client("viewer").await.unwrap();
        let owls = TeamRef::new(1, "Owls");

        open_question(&state, &owls, 7).await.unwrap();
        next_event(&mut viewer).await;
        submit_verdict(&state, &owls, 7, 100, false).await.unwrap();

        assert!(admin_unlock_for_team(&state, 1, 7).await.unwrap());
        assert_eq!(
            next_event(&mut viewer).await.payload,
            unlocked(7, UnlockReason::AdminOverride)
        );
        assert_eq!(
            state.attempts().get_attempts(1, 7).await.unwrap().wrong_attempts,
            0
        );
        assert!(state.locks().is_locked(7).await.unwrap().is_none());

        assert!(!admin_unlock_for_team(&state, 1, 7).await.unwrap());
    }

    #[tokio::test]
    async fn admin_unlock_leaves_other_teams_locks_alone() {
        let (state, _) = state_with(AppConfig::default()).await;
        open_question(&state, &TeamRef::new(2, "Foxes"), 7).await.unwrap();

        assert!(!admin_unlock_for_team(&state, 1, 7).await.unwrap());
        assert!(state.locks().is_locked(7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn force_release_reports_whether_a_lock_existed() {
        let (state, _) = state_with(AppConfig::default()).await;
        assert!(!admin_force_release(&state, 7).await);

        open_question(&state, &TeamRef::new(2, "Foxes"), 7).await.unwrap();
        assert!(admin_force_release(&state, 7).await);
        assert!(state.locks().is_locked(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn negative_points_are_rejected() {
        let (state, _) = state_with(AppConfig::default()).await;
        let err = submit_verdict(&state, &TeamRef::new(1, "Owls"), 7, -5, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn only_the_holder_may_answer() {
        let (state, _) = state_with(AppConfig::default()).await;
        let owls = TeamRef::new(1, "Owls");
        let foxes = TeamRef::new(2, "Foxes");
        open_question(&state, &owls, 7).await.unwrap();

        let locked_out = SubmissionOutcome::LockedByOther {
            holder_name: "Owls".into(),
        };
        assert_eq!(
            submit_verdict(&state, &foxes, 7, 100, false).await.unwrap(),
            locked_out
        );
        assert_eq!(
            submit_verdict(&state, &foxes, 7, 100, true).await.unwrap(),
            locked_out
        );

        let holder = state.locks().is_locked(7).await.unwrap().unwrap();
        assert_eq!(holder.locked_by_team_id, 1);
        assert_eq!(
            state.attempts().get_attempts(2, 7).await.unwrap().wrong_attempts,
            0
        );
        assert_eq!(
            state.quota().get_slot(2).await.unwrap().questions_solved_in_slot,
            0
        );
    }

    #[tokio::test]
    async fn correct_answer_past_the_quota_is_refused() {
        let config = AppConfig {
            quota_limit: 1,
            ..AppConfig::default()
        };
        let (state, _) = state_with(config).await;
        let owls = TeamRef::new(1, "Owls");
        open_question(&state, &owls, 7).await.unwrap();
        open_question(&state, &owls, 8).await.unwrap();

        assert!(matches!(
            submit_verdict(&state, &owls, 7, 100, true).await.unwrap(),
            SubmissionOutcome::Solved { .. }
        ));
        match submit_verdict(&state, &owls, 8, 100, true).await.unwrap() {
            SubmissionOutcome::QuotaExhausted(denial) => {
                assert_eq!((denial.solved, denial.limit), (1, 1));
                assert!(denial.message.contains("1/1"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        assert_eq!(
            state.quota().get_slot(1).await.unwrap().questions_solved_in_slot,
            1
        );
        assert!(state.locks().is_locked(8).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn solve_time_runs_from_first_opening() {
        let (state, clock) = state_with(AppConfig::default()).await;
        let owls = TeamRef::new(1, "Owls");
        open_question(&state, &owls, 7).await.unwrap();

        clock.advance(Duration::from_secs(30));
        open_question(&state, &owls, 7).await.unwrap();
        clock.advance(Duration::from_secs(45));

        assert_eq!(
            submit_verdict(&state, &owls, 7, 100, true).await.unwrap(),
            SubmissionOutcome::Solved {
                solve_time: Some(Duration::from_secs(75))
            }
        );
        assert_eq!(
            state.timers().total_solve_time(1).await.unwrap(),
            Duration::from_secs(75)
        );
    }

    #[tokio::test]
    async fn admin_unlock_restarts_the_solve_timer() {
        let (state, clock) = state_with(AppConfig::default()).await;
        let owls = TeamRef::new(1, "Owls");
        open_question(&state, &owls, 7).await.unwrap();
        clock.advance(Duration::from_secs(600));

        admin_unlock_for_team(&state, 1, 7).await.unwrap();
        open_question(&state, &owls, 7).await.unwrap();
        clock.advance(Duration::from_secs(10));

        assert_eq!(
            submit_verdict(&state, &owls, 7, 100, true).await.unwrap(),
            SubmissionOutcome::Solved {
                solve_time: Some(Duration::from_secs(10))
            }
        );
    }
}
