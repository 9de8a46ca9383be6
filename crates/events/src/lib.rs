//! Broker side of the storyfeed write path.
//!
//! - [`broker`]: the process-lifetime [`BrokerClient`] and its transports.
//! - [`topology`]: startup declaration of the fixed durable queues.
//! - [`routing`]: the mutation → queue table.
//! - [`publisher`]: [`EventEnvelope`] construction and best-effort delivery.

pub mod broker;
pub mod error;
pub mod publisher;
pub mod reconnect;
pub mod routing;
pub mod topology;

pub use broker::{BrokerClient, ConnectionState, InMemoryBroker};
pub use error::BrokerError;
pub use publisher::{EventEnvelope, EventPublisher};
pub use reconnect::ReconnectConfig;
pub use routing::Mutation;
pub use topology::{bootstrap_topology, TopologyReport, TOPOLOGY_QUEUES};
