//! Tables owned by the coordinator. Timestamps are stored as unix milliseconds.

pub(super) const STATEMENTS: &[(&str, &str)] = &[
    (
        "question_locks",
        "CREATE TABLE IF NOT EXISTS question_locks (
            question_id INTEGER PRIMARY KEY,
            locked_by_team_id INTEGER NOT NULL,
            locked_by_team_name TEXT NOT NULL,
            locked_at_ms INTEGER NOT NULL
        )",
    ),
    (
        "question_locks",
        "CREATE INDEX IF NOT EXISTS idx_question_locks_locked_at
            ON question_locks(locked_at_ms)",
    ),
    (
        "question_attempts",
        "CREATE TABLE IF NOT EXISTS question_attempts (
            team_id INTEGER NOT NULL,
            question_id INTEGER NOT NULL,
            wrong_attempts INTEGER NOT NULL DEFAULT 0,
            total_penalty INTEGER NOT NULL DEFAULT 0,
            last_attempt_at_ms INTEGER NOT NULL,
            PRIMARY KEY (team_id, question_id)
        )",
    ),
    (
        "team_quota_slots",
        "CREATE TABLE IF NOT EXISTS team_quota_slots (
            team_id INTEGER PRIMARY KEY,
            current_slot_start_ms INTEGER NOT NULL,
            questions_solved_in_slot INTEGER NOT NULL DEFAULT 0
        )",
    ),
    (
        "question_timers",
        "CREATE TABLE IF NOT EXISTS question_timers (
            team_id INTEGER NOT NULL,
            question_id INTEGER NOT NULL,
            started_at_ms INTEGER NOT NULL,
            completed_at_ms INTEGER,
            time_taken_seconds INTEGER,
            PRIMARY KEY (team_id, question_id)
        )",
    ),
];
