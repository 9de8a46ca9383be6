use crate::types::{EntityGuid, Timestamp};

/// Failure reported by a [`SnapshotStore`](crate::history::SnapshotStore)
/// implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Entity not found: {guid}")]
    NotFound { guid: EntityGuid },

    /// A create-only write found the identity already present.
    #[error("Entity already exists: {guid}")]
    AlreadyExists { guid: EntityGuid },

    /// The underlying storage rejected or failed the operation.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Outcome taxonomy of the write path, surfaced to the upstream request layer.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Entity not found: {guid}")]
    NotFound { guid: EntityGuid },

    /// The entity advanced past the version the caller observed.
    #[error("Stale write on {guid}: observed {observed}, latest is {latest}")]
    StaleWrite {
        guid: EntityGuid,
        observed: Timestamp,
        latest: Timestamp,
    },

    #[error("Entity already exists: {guid}")]
    AlreadyExists { guid: EntityGuid },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The snapshot could not be written; nothing was retained.
    #[error("Persist failed: {0}")]
    Persist(String),
}

impl From<StoreError> for WriteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { guid } => WriteError::NotFound { guid },
            StoreError::AlreadyExists { guid } => WriteError::AlreadyExists { guid },
            StoreError::Backend(msg) => WriteError::Persist(msg),
        }
    }
}
