//! Repository for the `entities` and `entity_snapshots` tables.
//!
//! Every function takes a generic executor so it can run against the pool
//! or inside a transaction.

use sqlx::PgExecutor;
use storyfeed_core::entity::{ContentFields, NewIdentity};
use storyfeed_core::types::{DbId, EntityGuid};

use crate::models::entity::{EntityRow, SnapshotRow};

/// Column list for `entities` queries.
const ENTITY_COLUMNS: &str = "id, guid, kind, author_guid, parent_guid, created_at";

/// Column list for snapshot queries; expects `entity_snapshots s JOIN entities e`.
const SNAPSHOT_COLUMNS: &str =
    "s.id, e.guid AS entity_guid, s.title, s.body_text, s.img_url, s.created_at";

/// Provides the queries behind [`PgSnapshotStore`](crate::PgSnapshotStore).
pub struct EntityRepo;

impl EntityRepo {
    // ── Identities ───────────────────────────────────────────────────

    /// Find an entity by its public guid.
    pub async fn find_by_guid<'e>(
        executor: impl PgExecutor<'e>,
        guid: EntityGuid,
    ) -> Result<Option<EntityRow>, sqlx::Error> {
        let query = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE guid = $1");
        sqlx::query_as::<_, EntityRow>(&query)
            .bind(guid)
            .fetch_optional(executor)
            .await
    }

    /// Insert the entity if absent and return its row either way.
    ///
    /// The no-op `DO UPDATE` makes `RETURNING` yield the existing row.
    pub async fn ensure<'e>(
        executor: impl PgExecutor<'e>,
        identity: &NewIdentity,
    ) -> Result<EntityRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO entities (guid, kind, author_guid, parent_guid)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (guid) DO UPDATE SET guid = EXCLUDED.guid
             RETURNING {ENTITY_COLUMNS}"
        );
        sqlx::query_as::<_, EntityRow>(&query)
            .bind(identity.guid)
            .bind(identity.kind.as_str())
            .bind(identity.author_guid)
            .bind(identity.parent_guid)
            .fetch_one(executor)
            .await
    }

    /// Insert a new entity. A taken guid surfaces as a unique violation.
    pub async fn insert<'e>(
        executor: impl PgExecutor<'e>,
        identity: &NewIdentity,
    ) -> Result<EntityRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO entities (guid, kind, author_guid, parent_guid)
             VALUES ($1, $2, $3, $4)
             RETURNING {ENTITY_COLUMNS}"
        );
        sqlx::query_as::<_, EntityRow>(&query)
            .bind(identity.guid)
            .bind(identity.kind.as_str())
            .bind(identity.author_guid)
            .bind(identity.parent_guid)
            .fetch_one(executor)
            .await
    }

    /// Delete an entity; snapshots go with it via `ON DELETE CASCADE`.
    /// Returns `true` if a row was deleted.
    pub async fn delete_by_guid<'e>(
        executor: impl PgExecutor<'e>,
        guid: EntityGuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM entities WHERE guid = $1")
            .bind(guid)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Append a snapshot to the entity with internal id `entity_id`.
    ///
    /// `created_at` is stamped by the database at millisecond precision.
    pub async fn insert_snapshot<'e>(
        executor: impl PgExecutor<'e>,
        entity_id: DbId,
        fields: &ContentFields,
    ) -> Result<SnapshotRow, sqlx::Error> {
        let query = format!(
            "WITH s AS (
                INSERT INTO entity_snapshots (entity_id, title, body_text, img_url)
                VALUES ($1, $2, $3, $4)
                RETURNING id, entity_id, title, body_text, img_url, created_at
             )
             SELECT {SNAPSHOT_COLUMNS} FROM s JOIN entities e ON e.id = s.entity_id"
        );
        sqlx::query_as::<_, SnapshotRow>(&query)
            .bind(entity_id)
            .bind(&fields.title)
            .bind(&fields.body_text)
            .bind(&fields.img_url)
            .fetch_one(executor)
            .await
    }

    /// Append a snapshot to the entity `guid` only if it still exists.
    ///
    /// Returns `None` when no entity row matches; nothing is inserted then.
    pub async fn insert_snapshot_for_guid<'e>(
        executor: impl PgExecutor<'e>,
        guid: EntityGuid,
        fields: &ContentFields,
    ) -> Result<Option<SnapshotRow>, sqlx::Error> {
        let query = format!(
            "WITH s AS (
                INSERT INTO entity_snapshots (entity_id, title, body_text, img_url)
                SELECT id, $2, $3, $4 FROM entities WHERE guid = $1
                RETURNING id, entity_id, title, body_text, img_url, created_at
             )
             SELECT {SNAPSHOT_COLUMNS} FROM s JOIN entities e ON e.id = s.entity_id"
        );
        sqlx::query_as::<_, SnapshotRow>(&query)
            .bind(guid)
            .bind(&fields.title)
            .bind(&fields.body_text)
            .bind(&fields.img_url)
            .fetch_optional(executor)
            .await
    }

    /// The newest snapshot by `(created_at, id)`.
    pub async fn latest_snapshot<'e>(
        executor: impl PgExecutor<'e>,
        guid: EntityGuid,
    ) -> Result<Option<SnapshotRow>, sqlx::Error> {
        let query = format!(
            "SELECT {SNAPSHOT_COLUMNS}
             FROM entity_snapshots s JOIN entities e ON e.id = s.entity_id
             WHERE e.guid = $1
             ORDER BY s.created_at DESC, s.id DESC
             LIMIT 1"
        );
        sqlx::query_as::<_, SnapshotRow>(&query)
            .bind(guid)
            .fetch_optional(executor)
            .await
    }

    /// All snapshots, oldest first.
    pub async fn list_snapshots<'e>(
        executor: impl PgExecutor<'e>,
        guid: EntityGuid,
    ) -> Result<Vec<SnapshotRow>, sqlx::Error> {
        let query = format!(
            "SELECT {SNAPSHOT_COLUMNS}
             FROM entity_snapshots s JOIN entities e ON e.id = s.entity_id
             WHERE e.guid = $1
             ORDER BY s.created_at ASC, s.id ASC"
        );
        sqlx::query_as::<_, SnapshotRow>(&query)
            .bind(guid)
            .fetch_all(executor)
            .await
    }

    /// Count the snapshots of an entity.
    pub async fn count_snapshots<'e>(
        executor: impl PgExecutor<'e>,
        guid: EntityGuid,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM entity_snapshots s
             JOIN entities e ON e.id = s.entity_id
             WHERE e.guid = $1",
        )
        .bind(guid)
        .fetch_one(executor)
        .await?;
        Ok(row.0)
    }
}
