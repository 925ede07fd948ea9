use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::services::lock_service::LockManager;

/// Spawn the periodic stale-lock sweep. The first sweep runs immediately.
pub fn spawn(manager: LockManager, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match manager.cleanup_stale().await {
                Ok(0) => debug!("stale lock sweep found nothing"),
                Ok(removed) => info!(removed, "stale lock sweep reclaimed locks"),
                Err(err) => warn!(error = %err, "stale lock sweep failed"),
            }
        }
    })
}
