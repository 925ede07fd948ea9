//! Events fanned out to every connected viewer.
//!
//! Each event serializes to a self-contained JSON object
//! `{"type": "...", "data": {...}, "timestamp": "<RFC 3339>"}`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::dto::locks::LockView;

/// Closed set of event payloads, tagged by `type` with the payload under `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// First message of every stream.
    Connected(ConnectedEvent),
    /// Active locks at connection time, sent right after [`EventPayload::Connected`].
    LocksSnapshot(LocksSnapshotEvent),
    /// A team started working on a question.
    QuestionLocked(QuestionLockedEvent),
    /// A question became available again.
    QuestionUnlocked(QuestionUnlockedEvent),
    /// A team solved a question.
    QuestionSolved(QuestionSolvedEvent),
    /// Scores changed; viewers should refresh the leaderboard.
    LeaderboardUpdate(LeaderboardUpdateEvent),
    /// Keeps idle connections open through proxies.
    Heartbeat(HeartbeatEvent),
}

/// An event stamped with its creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Event {
    pub fn new(payload: EventPayload, timestamp: OffsetDateTime) -> Self {
        Self { payload, timestamp }
    }

    /// Tag of the payload, as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::Connected(_) => "connected",
            EventPayload::LocksSnapshot(_) => "locks_snapshot",
            EventPayload::QuestionLocked(_) => "question_locked",
            EventPayload::QuestionUnlocked(_) => "question_unlocked",
            EventPayload::QuestionSolved(_) => "question_solved",
            EventPayload::LeaderboardUpdate(_) => "leaderboard_update",
            EventPayload::Heartbeat(_) => "heartbeat",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectedEvent {
    pub client_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LocksSnapshotEvent {
    pub locks: Vec<LockView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuestionLockedEvent {
    pub question_id: i64,
    pub team_id: i64,
    pub team_name: String,
}

/// Why a lock went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnlockReason {
    Solved,
    MaxAttemptsReached,
    AdminOverride,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuestionUnlockedEvent {
    pub question_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnlockReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuestionSolvedEvent {
    pub question_id: i64,
    pub team_id: i64,
    pub team_name: String,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardUpdateEvent {
    pub message: String,
}

impl Default for LeaderboardUpdateEvent {
    fn default() -> Self {
        Self {
            message: "Leaderboard updated".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatEvent {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn event_serializes_with_type_data_and_timestamp() {
        let event = Event::new(
            EventPayload::QuestionSolved(QuestionSolvedEvent {
                question_id: 7,
                team_id: 1,
                team_name: "Owls".into(),
                points: 100,
            }),
            datetime!(2025-03-01 12:00 UTC),
        );

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "question_solved",
                "data": {"question_id": 7, "team_id": 1, "team_name": "Owls", "points": 100},
                "timestamp": "2025-03-01T12:00:00Z",
            })
        );
        assert_eq!(event.kind(), "question_solved");
    }

    #[test]
    fn unlock_reason_is_omitted_when_absent() {
        let event = Event::new(
            EventPayload::QuestionUnlocked(QuestionUnlockedEvent {
                question_id: 3,
                reason: None,
            }),
            datetime!(2025-03-01 12:00 UTC),
        );
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"], json!({"question_id": 3}));

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
