use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    clock::SharedClock,
    config::AppConfig,
    dao::hunt_store::HuntStore,
    relay::EventRelay,
    services::{
        attempt_service::{AttemptTracker, PenaltySchedule},
        broadcaster::{Broadcaster, BroadcasterConfig},
        lock_service::LockManager,
        quota_service::QuotaTracker,
        timer_service::SolveTimer,
    },
};

pub type SharedState = Arc<AppState>;

/// Central application state: the storage handle, the coordination components built on it
/// and the broadcaster feeding connected viewers.
pub struct AppState {
    store: Arc<dyn HuntStore>,
    clock: SharedClock,
    config: AppConfig,
    locks: LockManager,
    attempts: AttemptTracker,
    quota: QuotaTracker,
    timers: SolveTimer,
    broadcaster: Broadcaster,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Wire every component over `store` and start the broadcaster.
    ///
    /// Events are relayed to other instances when `relay` is set.
    pub async fn build(
        config: AppConfig,
        store: Arc<dyn HuntStore>,
        clock: SharedClock,
        relay: Option<Arc<dyn EventRelay>>,
    ) -> SharedState {
        let locks = LockManager::new(store.clone(), clock.clone(), config.lock_staleness);
        let attempts = AttemptTracker::new(
            store.clone(),
            clock.clone(),
            PenaltySchedule::new(config.penalty_percentages.clone()),
        );
        let quota = QuotaTracker::new(
            store.clone(),
            clock.clone(),
            config.quota_limit,
            config.quota_slot,
        );
        let timers = SolveTimer::new(store.clone(), clock.clone());
        let broadcaster =
            Broadcaster::start(BroadcasterConfig::from(&config), clock.clone(), relay).await;
        let (degraded, _rx) = watch::channel(false);

        Arc::new(Self {
            store,
            clock,
            config,
            locks,
            attempts,
            quota,
            timers,
            broadcaster,
            degraded,
        })
    }

    pub fn store(&self) -> &Arc<dyn HuntStore> {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn attempts(&self) -> &AttemptTracker {
        &self.attempts
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn timers(&self) -> &SolveTimer {
        &self.timers
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}
