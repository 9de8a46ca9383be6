/// Errors raised by the broker client and the components built on it.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Failed to establish the broker connection or channel.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The message could not be handed to the broker.
    #[error("Publish error: {0}")]
    Publish(String),

    /// A queue declaration was refused or could not be sent.
    #[error("Failed to declare queue {queue}: {reason}")]
    Topology { queue: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client was torn down; no further operations are possible.
    #[error("Broker client is closed")]
    Closed,
}
