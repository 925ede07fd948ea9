use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::state::SharedState;

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll storage health, reconnecting with backoff and flagging degraded mode while it is down.
pub async fn run(state: SharedState) {
    let store = state.store().clone();

    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed; entering degraded mode");
                state.update_degraded(true);

                let mut delay = INITIAL_DELAY;
                let mut attempt: u32 = 0;
                loop {
                    attempt += 1;
                    match store.try_reconnect().await {
                        Ok(()) => {
                            info!(attempt, "storage reconnection succeeded");
                            state.update_degraded(false);
                            break;
                        }
                        Err(reconnect_err) => {
                            warn!(attempt, error = %reconnect_err, "storage reconnect attempt failed");
                            sleep(delay).await;
                            delay = (delay * 2).min(MAX_DELAY);
                        }
                    }
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
        }
    }
}
