//! Turns committed mutations into broker messages.
//!
//! The publisher is only called after the History Store has durably
//! recorded a change. Its queue choice comes from [`Mutation::queue`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storyfeed_core::types::EntityGuid;

use crate::broker::BrokerClient;
use crate::error::BrokerError;
use crate::routing::Mutation;

// ---------------------------------------------------------------------------
// EventEnvelope
// ---------------------------------------------------------------------------

/// JSON body of every message sent by the write path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Dot-separated event name, e.g. `"story.updated"`.
    pub event_type: String,
    pub entity_guid: EntityGuid,
    /// Event-specific data, usually derived from the new snapshot.
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(mutation: Mutation, entity_guid: EntityGuid, payload: serde_json::Value) -> Self {
        Self {
            event_type: mutation.event_type().to_string(),
            entity_guid,
            payload,
            published_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventPublisher
// ---------------------------------------------------------------------------

/// Routes envelopes to their queue over the shared [`BrokerClient`].
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<BrokerClient>,
}

impl EventPublisher {
    pub fn new(broker: Arc<BrokerClient>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<BrokerClient> {
        &self.broker
    }

    /// Publish `payload` for `mutation`, returning any broker failure.
    pub async fn publish(
        &self,
        mutation: Mutation,
        entity_guid: EntityGuid,
        payload: serde_json::Value,
    ) -> Result<(), BrokerError> {
        let envelope = EventEnvelope::new(mutation, entity_guid, payload);
        self.broker.publish(mutation.queue(), &envelope).await
    }

    /// Best-effort publish used after a successful persist.
    ///
    /// Failures are logged and not retried; returns whether the message was
    /// handed to the broker.
    pub async fn notify(
        &self,
        mutation: Mutation,
        entity_guid: EntityGuid,
        payload: serde_json::Value,
    ) -> bool {
        match self.publish(mutation, entity_guid, payload).await {
            Ok(()) => {
                tracing::debug!(
                    queue = %mutation.queue(),
                    event_type = %mutation.event_type(),
                    entity_guid = %entity_guid,
                    "Event published",
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    queue = %mutation.queue(),
                    event_type = %mutation.event_type(),
                    entity_guid = %entity_guid,
                    error = %e,
                    "Failed to publish event",
                );
                false
            }
        }
    }
}
