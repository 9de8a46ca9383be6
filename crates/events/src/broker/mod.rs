//! Broker transport seam and the process-wide [`BrokerClient`].
//!
//! A [`BrokerConnector`] opens one connection plus channel and hands back a
//! [`BrokerChannel`]. The client owns that channel for the life of the
//! process. Two transports ship with the crate:
//!
//! - [`AmqpConnector`]: RabbitMQ / AMQP 0-9-1 via `lapin`.
//! - [`InMemoryBroker`]: process-local queues for tests.

mod amqp;
mod client;
mod memory;

use async_trait::async_trait;

use crate::error::BrokerError;

pub use amqp::{redact_url, AmqpChannel, AmqpConnector};
pub use client::{BrokerClient, ConnectionState};
pub use memory::InMemoryBroker;

/// Opens a connection and channel to a broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;

    /// Human-readable target for logs; must not leak credentials.
    fn describe(&self) -> String;
}

/// An open channel on a broker connection.
///
/// Implementations must tolerate interleaved calls from concurrent tasks;
/// frame integrity is the transport's responsibility.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a durable queue. Re-declaring with identical properties is a no-op.
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// Send `body` to `queue` as a persistent message. Does not wait for
    /// consumer acknowledgement.
    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;

    /// Close the channel and its connection.
    async fn close(&self) -> Result<(), BrokerError>;
}
