//! Fan-out of hunt events to every connected viewer.
//!
//! A single dispatch loop owns the client registry and consumes four channels: registrations,
//! unregistrations, locally raised events and events relayed from other instances. Nothing
//! else touches the registry, so it needs no lock. Delivery to each client is bounded by the
//! delivery timeout; a saturated client misses the event instead of delaying the others.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, future::join_all, stream::BoxStream};
use indexmap::IndexMap;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clock::SharedClock,
    config::AppConfig,
    dto::events::{Event, EventPayload},
    error::BroadcastError,
    relay::{EventRelay, RelayEnvelope},
};

const RESUBSCRIBE_INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(10);

/// Queue sizes and delivery bound of the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcasterConfig {
    pub client_queue_capacity: usize,
    pub dispatch_queue_capacity: usize,
    pub registration_queue_capacity: usize,
    pub delivery_timeout: Duration,
}

impl From<&AppConfig> for BroadcasterConfig {
    fn from(value: &AppConfig) -> Self {
        Self {
            client_queue_capacity: value.client_queue_capacity,
            dispatch_queue_capacity: value.dispatch_queue_capacity,
            registration_queue_capacity: value.registration_queue_capacity,
            delivery_timeout: value.delivery_timeout,
        }
    }
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        (&AppConfig::default()).into()
    }
}

struct Registration {
    client_id: String,
    sender: mpsc::Sender<Event>,
    ack: oneshot::Sender<()>,
}

/// Handle to the dispatch loop. Cheap to clone; the loop stops once every handle is dropped.
#[derive(Clone)]
pub struct Broadcaster {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<String>,
    local_tx: mpsc::Sender<Event>,
    clients: Arc<AtomicUsize>,
    clock: SharedClock,
    config: BroadcasterConfig,
}

/// A registered viewer and its private event queue.
pub struct Client {
    id: String,
    receiver: mpsc::Receiver<Event>,
}

impl Client {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next event, or `None` once the client was unregistered.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`Client::recv`].
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

impl Broadcaster {
    /// Start the dispatch loop, relaying through `relay` when one is configured.
    ///
    /// The first relay subscription is attempted before returning so that events published by
    /// other instances right after startup are not missed. A failed subscription is retried in
    /// the background while local delivery keeps working.
    pub async fn start(
        config: BroadcasterConfig,
        clock: SharedClock,
        relay: Option<Arc<dyn EventRelay>>,
    ) -> Self {
        let instance_id = Uuid::new_v4();
        let (register_tx, register_rx) = mpsc::channel(config.registration_queue_capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(config.registration_queue_capacity);
        let (local_tx, local_rx) = mpsc::channel(config.dispatch_queue_capacity);
        let (relayed_tx, relayed_rx) = mpsc::channel(config.dispatch_queue_capacity);
        let clients = Arc::new(AtomicUsize::new(0));

        let publish_tx = match relay {
            Some(relay) => {
                let initial = match relay.subscribe().await {
                    Ok(stream) => Some(stream),
                    Err(err) => {
                        warn!(error = %err, "relay subscription failed; retrying in background");
                        None
                    }
                };
                tokio::spawn(run_subscriber(
                    relay.clone(),
                    initial,
                    relayed_tx,
                    instance_id,
                ));

                let (publish_tx, publish_rx) = mpsc::channel(config.dispatch_queue_capacity);
                tokio::spawn(run_publisher(relay, publish_rx, instance_id));
                Some(publish_tx)
            }
            None => {
                info!("no relay configured; delivering events to local clients only");
                drop(relayed_tx);
                None
            }
        };

        let dispatch = DispatchLoop {
            register_rx,
            unregister_rx,
            local_rx,
            relayed_rx,
            publish_tx,
            registry: Registry {
                clients: IndexMap::new(),
                count: clients.clone(),
                delivery_timeout: config.delivery_timeout,
            },
        };
        tokio::spawn(dispatch.run());

        Self {
            register_tx,
            unregister_tx,
            local_tx,
            clients,
            clock,
            config,
        }
    }

    /// Register a viewer. Events broadcast after this returns reach its queue.
    pub async fn register_client(
        &self,
        client_id: impl Into<String>,
    ) -> Result<Client, BroadcastError> {
        let client_id = client_id.into();
        let (sender, receiver) = mpsc::channel(self.config.client_queue_capacity);
        let (ack, acked) = oneshot::channel();
        let registration = Registration {
            client_id: client_id.clone(),
            sender,
            ack,
        };

        match timeout(
            self.config.delivery_timeout,
            self.register_tx.send(registration),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(BroadcastError::Stopped),
            Err(_) => {
                warn!(%client_id, "registration queue saturated; rejecting client");
                return Err(BroadcastError::Saturated);
            }
        }
        acked.await.map_err(|_| BroadcastError::Stopped)?;

        Ok(Client {
            id: client_id,
            receiver,
        })
    }

    /// Remove a viewer and close its queue. Unknown ids are ignored.
    pub async fn unregister_client(&self, client_id: &str) {
        match timeout(
            self.config.delivery_timeout,
            self.unregister_tx.send(client_id.to_owned()),
        )
        .await
        {
            Ok(Ok(())) => {}
            // The registry drops closed queues on the next delivery anyway.
            Ok(Err(_)) | Err(_) => {
                debug!(%client_id, "unregistration not queued; client will be pruned on delivery")
            }
        }
    }

    /// Stamp `payload` with the current time and queue it for every client.
    ///
    /// Best effort: when the dispatch queue stays full for the delivery timeout the event is
    /// dropped with a warning.
    pub async fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload, self.clock.now());
        let kind = event.kind();
        match timeout(self.config.delivery_timeout, self.local_tx.send(event)).await {
            Ok(Ok(())) => debug!(event = kind, "event queued for dispatch"),
            Ok(Err(_)) => warn!(event = kind, "dispatch loop stopped; event dropped"),
            Err(_) => warn!(event = kind, "dispatch queue full; event dropped"),
        }
    }

    /// Point-in-time number of registered clients.
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

struct DispatchLoop {
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<String>,
    local_rx: mpsc::Receiver<Event>,
    relayed_rx: mpsc::Receiver<Event>,
    publish_tx: Option<mpsc::Sender<Event>>,
    registry: Registry,
}

impl DispatchLoop {
    async fn run(self) {
        let DispatchLoop {
            mut register_rx,
            mut unregister_rx,
            mut local_rx,
            mut relayed_rx,
            publish_tx,
            mut registry,
        } = self;

        loop {
            tokio::select! {
                biased;
                Some(registration) = register_rx.recv() => registry.insert(registration),
                Some(client_id) = unregister_rx.recv() => registry.remove(&client_id),
                local = local_rx.recv() => match local {
                    Some(event) => {
                        if let Some(publish_tx) = &publish_tx {
                            forward_to_relay(publish_tx, &event);
                        }
                        registry.deliver(&event).await;
                    }
                    None => break,
                },
                Some(event) = relayed_rx.recv() => registry.deliver(&event).await,
            }
        }

        debug!("broadcaster handles dropped; dispatch loop stopped");
    }
}

fn forward_to_relay(publish_tx: &mpsc::Sender<Event>, event: &Event) {
    match publish_tx.try_send(event.clone()) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(event = event.kind(), "relay publish queue full; event not relayed")
        }
        Err(TrySendError::Closed(_)) => {
            warn!(event = event.kind(), "relay publisher stopped; event not relayed")
        }
    }
}

struct Registry {
    clients: IndexMap<String, mpsc::Sender<Event>>,
    count: Arc<AtomicUsize>,
    delivery_timeout: Duration,
}

enum Delivery {
    Sent,
    Skipped,
    Closed,
}

impl Registry {
    fn insert(&mut self, registration: Registration) {
        let Registration {
            client_id,
            sender,
            ack,
        } = registration;
        if self.clients.insert(client_id.clone(), sender).is_some() {
            warn!(%client_id, "client id registered twice; previous queue closed");
        }
        self.sync_count();
        info!(%client_id, clients = self.clients.len(), "client registered");
        let _ = ack.send(());
    }

    fn remove(&mut self, client_id: &str) {
        if self.clients.shift_remove(client_id).is_some() {
            self.sync_count();
            info!(%client_id, clients = self.clients.len(), "client unregistered");
        }
    }

    async fn deliver(&mut self, event: &Event) {
        let bound = self.delivery_timeout;
        let attempts = self.clients.iter().map(|(client_id, sender)| {
            let event = event.clone();
            async move {
                let outcome = match sender.try_send(event) {
                    Ok(()) => Delivery::Sent,
                    Err(TrySendError::Closed(_)) => Delivery::Closed,
                    Err(TrySendError::Full(event)) => match timeout(bound, sender.send(event)).await {
                        Ok(Ok(())) => Delivery::Sent,
                        Ok(Err(_)) => Delivery::Closed,
                        Err(_) => Delivery::Skipped,
                    },
                };
                (client_id.clone(), outcome)
            }
        });
        let outcomes = join_all(attempts).await;

        let mut closed = Vec::new();
        for (client_id, outcome) in outcomes {
            match outcome {
                Delivery::Sent => {}
                Delivery::Skipped => {
                    warn!(%client_id, event = event.kind(), "client queue full; event skipped")
                }
                Delivery::Closed => closed.push(client_id),
            }
        }
        for client_id in closed {
            debug!(%client_id, "pruning disconnected client");
            self.remove(&client_id);
        }
    }

    fn sync_count(&self) {
        self.count.store(self.clients.len(), Ordering::Relaxed);
    }
}

async fn run_publisher(
    relay: Arc<dyn EventRelay>,
    mut publish_rx: mpsc::Receiver<Event>,
    instance_id: Uuid,
) {
    while let Some(event) = publish_rx.recv().await {
        let envelope = RelayEnvelope {
            origin: instance_id,
            event,
        };
        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to encode relay envelope");
                continue;
            }
        };
        if let Err(err) = relay.publish(payload).await {
            warn!(error = %err, event = envelope.event.kind(), "relay publish failed");
        }
    }
}

async fn run_subscriber(
    relay: Arc<dyn EventRelay>,
    mut stream: Option<BoxStream<'static, String>>,
    relayed_tx: mpsc::Sender<Event>,
    instance_id: Uuid,
) {
    let mut delay = RESUBSCRIBE_INITIAL_DELAY;

    loop {
        let mut current = match stream.take() {
            Some(current) => current,
            None => {
                tokio::select! {
                    _ = relayed_tx.closed() => return,
                    _ = sleep(delay) => {}
                }
                delay = (delay * 2).min(RESUBSCRIBE_MAX_DELAY);
                match relay.subscribe().await {
                    Ok(current) => {
                        info!("relay subscription restored");
                        current
                    }
                    Err(err) => {
                        warn!(error = %err, "relay resubscription failed");
                        continue;
                    }
                }
            }
        };
        delay = RESUBSCRIBE_INITIAL_DELAY;

        loop {
            let payload = tokio::select! {
                _ = relayed_tx.closed() => return,
                payload = current.next() => payload,
            };
            let Some(payload) = payload else {
                warn!("relay subscription ended; delivering locally until it is restored");
                break;
            };

            let envelope = match RelayEnvelope::decode(&payload) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(error = %err, "discarding malformed relay payload");
                    continue;
                }
            };
            if envelope.origin == instance_id {
                continue;
            }
            if relayed_tx.send(envelope.event).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::{
        clock::ManualClock,
        dto::events::{LeaderboardUpdateEvent, QuestionUnlockedEvent},
        relay::memory::MemoryRelay,
    };

    fn clock() -> SharedClock {
        Arc::new(ManualClock::new(datetime!(2025-03-01 12:00 UTC)))
    }

    fn unlocked(question_id: i64) -> EventPayload {
        EventPayload::QuestionUnlocked(QuestionUnlockedEvent {
            question_id,
            reason: None,
        })
    }

    async fn recv(client: &mut Client) -> Event {
        timeout(Duration::from_secs(1), client.recv())
            .await
            .expect("event within a second")
            .expect("queue open")
    }

    #[tokio::test]
    async fn events_reach_every_client_in_emission_order() {
        let broadcaster = Broadcaster::start(BroadcasterConfig::default(), clock(), None).await;
        let mut first = broadcaster.register_client("a").await.unwrap();
        let mut second = broadcaster.register_client("b").await.unwrap();
        assert_eq!(broadcaster.client_count(), 2);

        broadcaster.broadcast(unlocked(1)).await;
        broadcaster.broadcast(unlocked(2)).await;

        for client in [&mut first, &mut second] {
            assert_eq!(recv(client).await.payload, unlocked(1));
            assert_eq!(recv(client).await.payload, unlocked(2));
        }
    }

    #[tokio::test]
    async fn saturated_client_does_not_block_others() {
        let config = BroadcasterConfig {
            client_queue_capacity: 1,
            delivery_timeout: Duration::from_millis(20),
            ..BroadcasterConfig::default()
        };
        let broadcaster = Broadcaster::start(config, clock(), None).await;
        let mut stalled = broadcaster.register_client("stalled").await.unwrap();
        let mut live = broadcaster.register_client("live").await.unwrap();

        for question_id in 1..=3 {
            broadcaster.broadcast(unlocked(question_id)).await;
            assert_eq!(recv(&mut live).await.payload, unlocked(question_id));
        }

        assert_eq!(recv(&mut stalled).await.payload, unlocked(1));
        assert!(stalled.try_recv().is_none());
        assert_eq!(broadcaster.client_count(), 2);
    }

    #[tokio::test]
    async fn unregister_closes_the_queue_and_is_idempotent() {
        let broadcaster = Broadcaster::start(BroadcasterConfig::default(), clock(), None).await;
        let mut client = broadcaster.register_client("gone").await.unwrap();

        broadcaster.unregister_client("gone").await;
        broadcaster.unregister_client("gone").await;
        broadcaster.unregister_client("never-registered").await;

        assert!(client.recv().await.is_none());
        assert_eq!(broadcaster.client_count(), 0);
    }

    #[tokio::test]
    async fn dropped_clients_are_pruned_on_delivery() {
        let broadcaster = Broadcaster::start(BroadcasterConfig::default(), clock(), None).await;
        let dropped = broadcaster.register_client("dropped").await.unwrap();
        let mut kept = broadcaster.register_client("kept").await.unwrap();
        drop(dropped);

        broadcaster
            .broadcast(EventPayload::LeaderboardUpdate(LeaderboardUpdateEvent::default()))
            .await;
        recv(&mut kept).await;

        assert_eq!(broadcaster.client_count(), 1);
    }

    #[tokio::test]
    async fn relayed_events_cross_instances_once() {
        let relay: Arc<dyn EventRelay> = Arc::new(MemoryRelay::default());
        let a = Broadcaster::start(BroadcasterConfig::default(), clock(), Some(relay.clone())).await;
        let b = Broadcaster::start(BroadcasterConfig::default(), clock(), Some(relay)).await;
        let mut on_a = a.register_client("on-a").await.unwrap();
        let mut on_b = b.register_client("on-b").await.unwrap();

        a.broadcast(unlocked(7)).await;

        assert_eq!(recv(&mut on_b).await.payload, unlocked(7));
        assert_eq!(recv(&mut on_a).await.payload, unlocked(7));

        sleep(Duration::from_millis(50)).await;
        assert!(on_a.try_recv().is_none());
        assert!(on_b.try_recv().is_none());
    }
}
