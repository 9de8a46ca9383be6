//! Row structs for the `entities` and `entity_snapshots` tables.

use serde::Serialize;
use sqlx::FromRow;
use storyfeed_core::entity::{ContentFields, EntityKind, Identity, Snapshot, UnknownKind};
use storyfeed_core::types::{DbId, EntityGuid, Timestamp};

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A row from the `entities` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EntityRow {
    pub id: DbId,
    pub guid: EntityGuid,
    pub kind: String,
    pub author_guid: Option<EntityGuid>,
    pub parent_guid: Option<EntityGuid>,
    pub created_at: Timestamp,
}

impl TryFrom<EntityRow> for Identity {
    type Error = UnknownKind;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        Ok(Identity {
            id: row.id,
            guid: row.guid,
            kind: row.kind.parse::<EntityKind>()?,
            author_guid: row.author_guid,
            parent_guid: row.parent_guid,
            created_at: row.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A row from `entity_snapshots`, joined with its entity's guid.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SnapshotRow {
    pub id: DbId,
    pub entity_guid: EntityGuid,
    pub title: Option<String>,
    pub body_text: Option<String>,
    pub img_url: Option<String>,
    pub created_at: Timestamp,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Snapshot {
            id: row.id,
            entity_guid: row.entity_guid,
            fields: ContentFields {
                title: row.title,
                body_text: row.body_text,
                img_url: row.img_url,
            },
            created_at: row.created_at,
        }
    }
}
