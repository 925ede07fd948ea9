use futures::{StreamExt, future::BoxFuture, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use super::{EventRelay, RelayError, RelayResult};

const DEFAULT_CAPACITY: usize = 1024;

/// In-process relay; instances sharing a clone see each other's events.
#[derive(Clone)]
pub struct MemoryRelay {
    sender: broadcast::Sender<String>,
}

impl MemoryRelay {
    /// Create a relay buffering up to `capacity` payloads per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventRelay for MemoryRelay {
    fn publish(&self, payload: String) -> BoxFuture<'static, RelayResult<()>> {
        // No subscriber is not an error; the payload is simply dropped like a pub/sub message.
        let _ = self.sender.send(payload);
        Box::pin(async { Ok(()) })
    }

    fn subscribe(&self) -> BoxFuture<'static, RelayResult<BoxStream<'static, String>>> {
        let receiver = self.sender.subscribe();
        Box::pin(async move {
            let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
                match item {
                    Ok(payload) => Some(payload),
                    Err(err) => {
                        warn!(error = %err, "memory relay subscriber lagged; payloads skipped");
                        None
                    }
                }
            });
            Ok::<_, RelayError>(stream.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_payloads_published_after_subscribing() {
        let relay = MemoryRelay::default();
        relay.publish("before".to_owned()).await.unwrap();

        let mut stream = relay.subscribe().await.unwrap();
        relay.publish("after".to_owned()).await.unwrap();

        assert_eq!(stream.next().await.as_deref(), Some("after"));
    }
}
