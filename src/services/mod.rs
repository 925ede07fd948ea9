/// Per-(team, question) wrong-answer tracking and penalties.
pub mod attempt_service;
/// Event fan-out to connected viewers, optionally relayed across instances.
pub mod broadcaster;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Request flows: opening questions, verdicts and admin overrides.
pub mod hunt_service;
/// Exclusive question locks.
pub mod lock_service;
/// Periodic stale-lock reclamation.
pub mod lock_sweeper;
/// Rolling per-team solve quota.
pub mod quota_service;
/// Server-Sent Events viewer streams.
pub mod sse_service;
/// Storage health polling and degraded-mode tracking.
pub mod storage_supervisor;
/// Per-question solve timers.
pub mod timer_service;
