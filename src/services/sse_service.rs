//! Viewer streams: a greeting with the current locks, then every broadcast event and a
//! periodic heartbeat until the viewer disconnects.

use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event as SseEvent, Sse};
use futures::{Stream, StreamExt};
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clock::SharedClock,
    dto::events::{ConnectedEvent, Event, EventPayload, HeartbeatEvent, LocksSnapshotEvent},
    error::ServiceError,
    services::broadcaster::{Broadcaster, Client},
    state::SharedState,
};

/// Register a new viewer and return its event feed.
///
/// The feed starts with `connected` and a snapshot of the active locks, then carries live
/// events interleaved with heartbeats. The viewer is unregistered once the receiver is dropped.
pub async fn subscribe(state: &SharedState) -> Result<mpsc::Receiver<Event>, ServiceError> {
    let client_id = Uuid::new_v4().to_string();
    let client = state.broadcaster().register_client(client_id.clone()).await?;

    let locks = match state.locks().list_locked().await {
        Ok(locks) => locks,
        Err(err) => {
            warn!(%client_id, error = %err, "failed to load lock snapshot for new viewer");
            Vec::new()
        }
    };

    let clock = state.clock().clone();
    let greeting = [
        Event::new(
            EventPayload::Connected(ConnectedEvent {
                client_id: client_id.clone(),
                message: "Connected to live updates".to_owned(),
            }),
            clock.now(),
        ),
        Event::new(
            EventPayload::LocksSnapshot(LocksSnapshotEvent {
                locks: locks.into_iter().map(Into::into).collect(),
            }),
            clock.now(),
        ),
    ];

    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Event>(8);
    tokio::spawn(forward(
        client,
        tx,
        greeting,
        state.broadcaster().clone(),
        clock,
        state.config().heartbeat_interval,
    ));
    info!(%client_id, "new viewer connected");

    Ok(rx)
}

/// Encode a viewer feed as an SSE response; each message's data is the full JSON event.
pub fn to_sse_stream(
    receiver: mpsc::Receiver<Event>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = ReceiverStream::new(receiver).filter_map(|event| async move {
        match event.to_json() {
            Ok(data) => Some(Ok::<_, Infallible>(SseEvent::default().data(data))),
            Err(err) => {
                warn!(event = event.kind(), error = %err, "failed to encode event");
                None
            }
        }
    });
    Sse::new(stream)
}

async fn forward(
    mut client: Client,
    tx: mpsc::Sender<Event>,
    greeting: [Event; 2],
    broadcaster: Broadcaster,
    clock: SharedClock,
    heartbeat_every: Duration,
) {
    let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut open = true;
    for event in greeting {
        if tx.send(event).await.is_err() {
            open = false;
            break;
        }
    }

    while open {
        let next = tokio::select! {
            _ = tx.closed() => break,
            event = client.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = heartbeat.tick() => {
                let now = clock.now();
                Event::new(
                    EventPayload::Heartbeat(HeartbeatEvent {
                        timestamp: now.unix_timestamp(),
                    }),
                    now,
                )
            }
        };

        if tx.send(next).await.is_err() {
            break;
        }
    }

    broadcaster.unregister_client(client.id()).await;
    info!(client_id = client.id(), "viewer disconnected");
}
