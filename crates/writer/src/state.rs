use std::sync::Arc;

use storyfeed_db::{DbPool, PgSnapshotStore};
use storyfeed_events::{BrokerClient, EventPublisher};

use crate::config::WriterConfig;
use crate::service::EntityService;
use crate::watchdog::BrokerWatchdog;

/// Shared state handed to the request layer that embeds the writer.
///
/// Cheap to clone; every field is an `Arc` or already `Clone`.
#[derive(Clone)]
pub struct WriterState {
    /// Database connection pool.
    pub pool: DbPool,
    pub config: Arc<WriterConfig>,
    /// Process-wide broker client, also driven by the watchdog.
    pub broker: Arc<BrokerClient>,
    /// Story and comment mutations.
    pub service: EntityService,
}

impl WriterState {
    /// Wire the write path over PostgreSQL and `broker`.
    pub fn new(pool: DbPool, config: WriterConfig, broker: Arc<BrokerClient>) -> Self {
        let store = Arc::new(PgSnapshotStore::new(pool.clone()));
        let service = EntityService::new(store, EventPublisher::new(Arc::clone(&broker)));
        Self {
            pool,
            config: Arc::new(config),
            broker,
            service,
        }
    }

    /// A watchdog for this state's broker client at the configured interval.
    pub fn watchdog(&self) -> BrokerWatchdog {
        BrokerWatchdog::new(Arc::clone(&self.broker), self.config.watchdog_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyfeed_events::{ConnectionState, InMemoryBroker, ReconnectConfig};
    use tokio_util::sync::CancellationToken;

    fn state(broker: &InMemoryBroker) -> WriterState {
        let config = WriterConfig::from_lookup(|name| {
            (name == "DATABASE_URL").then(|| "postgres://localhost/storyfeed".to_string())
        })
        .unwrap();
        // Never used for a query here, so no database is needed.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        let client = Arc::new(BrokerClient::new(broker.clone(), ReconnectConfig::default()));
        WriterState::new(pool, config, client)
    }

    #[tokio::test]
    async fn clones_share_the_broker_client() {
        let broker = InMemoryBroker::new();
        let state = state(&broker);
        let clone = state.clone();

        assert!(Arc::ptr_eq(&state.broker, &clone.broker));
        assert!(Arc::ptr_eq(&state.config, &clone.config));

        state.broker.connect().await.unwrap();
        assert_eq!(clone.broker.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn watchdog_drives_the_shared_client() {
        let broker = InMemoryBroker::new();
        let state = state(&broker);
        state.broker.connect().await.unwrap();
        broker.sever();

        assert!(state.watchdog().check(&CancellationToken::new()).await);

        assert_eq!(state.broker.state().await, ConnectionState::Connected);
        assert_eq!(broker.connections(), 2);
    }
}
