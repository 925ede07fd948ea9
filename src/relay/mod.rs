//! Cross-instance fan-out of hunt events.
//!
//! Every broadcaster publishes the events raised locally to a relay and delivers what it
//! receives from the relay to its own clients. Payloads are wrapped in a [`RelayEnvelope`]
//! carrying the publishing instance id, so an instance never delivers its own echo twice.

pub mod memory;
#[cfg(feature = "redis-relay")]
pub mod redis;

use futures::{future::BoxFuture, stream::BoxStream};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::dto::events::Event;

/// Result alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Failure talking to the relay transport.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The transport rejected the connection or a command.
    #[error("relay transport error: {message}")]
    Transport {
        /// Human-readable description of the failed operation.
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The relay was shut down.
    #[error("relay channel closed")]
    Closed,
}

impl RelayError {
    /// Wrap a transport failure.
    pub fn transport(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        RelayError::Transport {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

/// Publish/subscribe transport shared by every coordinator instance.
pub trait EventRelay: Send + Sync {
    /// Publish one serialized envelope.
    fn publish(&self, payload: String) -> BoxFuture<'static, RelayResult<()>>;
    /// Subscribe to every envelope published from now on, including this instance's own.
    fn subscribe(&self) -> BoxFuture<'static, RelayResult<BoxStream<'static, String>>>;
}

/// Wire format of a relayed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Instance that raised the event.
    pub origin: Uuid,
    /// The event itself.
    pub event: Event,
}

impl RelayEnvelope {
    /// Serialize for the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a payload received from the relay.
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
