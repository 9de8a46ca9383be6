//! [`SnapshotStore`] implementation over PostgreSQL.

use async_trait::async_trait;
use storyfeed_core::entity::{ContentFields, Identity, NewIdentity, Snapshot};
use storyfeed_core::error::StoreError;
use storyfeed_core::history::SnapshotStore;
use storyfeed_core::types::EntityGuid;

use crate::repositories::EntityRepo;
use crate::DbPool;

/// History Store backed by the `entities` / `entity_snapshots` tables.
#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: DbPool,
}

impl PgSnapshotStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    tracing::error!(error = %err, "Snapshot store query failed");
    StoreError::Backend(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn find_identity(&self, guid: EntityGuid) -> Result<Option<Identity>, StoreError> {
        let Some(row) = EntityRepo::find_by_guid(&self.pool, guid)
            .await
            .map_err(backend)?
        else {
            return Ok(None);
        };
        Identity::try_from(row)
            .map(Some)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn append(
        &self,
        identity: &NewIdentity,
        fields: &ContentFields,
    ) -> Result<Snapshot, StoreError> {
        // Identity creation and the snapshot insert commit together.
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let entity = EntityRepo::ensure(&mut *tx, identity)
            .await
            .map_err(backend)?;
        let row = EntityRepo::insert_snapshot(&mut *tx, entity.id, fields)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;

        tracing::debug!(
            entity_guid = %identity.guid,
            snapshot_id = row.id,
            "Snapshot appended",
        );
        Ok(row.into())
    }

    async fn create(
        &self,
        identity: &NewIdentity,
        fields: &ContentFields,
    ) -> Result<Snapshot, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let entity = match EntityRepo::insert(&mut *tx, identity).await {
            Ok(entity) => entity,
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::AlreadyExists {
                    guid: identity.guid,
                });
            }
            Err(e) => return Err(backend(e)),
        };
        let row = EntityRepo::insert_snapshot(&mut *tx, entity.id, fields)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;

        tracing::debug!(
            entity_guid = %identity.guid,
            snapshot_id = row.id,
            "Entity created",
        );
        Ok(row.into())
    }

    async fn append_existing(
        &self,
        guid: EntityGuid,
        fields: &ContentFields,
    ) -> Result<Snapshot, StoreError> {
        let row = EntityRepo::insert_snapshot_for_guid(&self.pool, guid, fields)
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound { guid })?;

        tracing::debug!(entity_guid = %guid, snapshot_id = row.id, "Snapshot appended");
        Ok(row.into())
    }

    async fn latest(&self, guid: EntityGuid) -> Result<Option<Snapshot>, StoreError> {
        EntityRepo::latest_snapshot(&self.pool, guid)
            .await
            .map(|row| row.map(Snapshot::from))
            .map_err(backend)
    }

    async fn history(&self, guid: EntityGuid) -> Result<Vec<Snapshot>, StoreError> {
        EntityRepo::list_snapshots(&self.pool, guid)
            .await
            .map(|rows| rows.into_iter().map(Snapshot::from).collect())
            .map_err(backend)
    }

    async fn snapshot_count(&self, guid: EntityGuid) -> Result<i64, StoreError> {
        EntityRepo::count_snapshots(&self.pool, guid)
            .await
            .map_err(backend)
    }

    async fn remove(&self, guid: EntityGuid) -> Result<(), StoreError> {
        let deleted = EntityRepo::delete_by_guid(&self.pool, guid)
            .await
            .map_err(backend)?;
        if !deleted {
            return Err(StoreError::NotFound { guid });
        }
        tracing::debug!(entity_guid = %guid, "Entity removed with its history");
        Ok(())
    }
}
