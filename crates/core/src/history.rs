//! The History Store contract and an in-memory implementation.
//!
//! A [`SnapshotStore`] exclusively owns snapshot storage. Snapshots are
//! append-only: the only way to discard one is to remove its whole identity.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::entity::{ContentFields, Identity, NewIdentity, Snapshot};
use crate::error::StoreError;
use crate::types::{DbId, EntityGuid, Timestamp};

/// Persistent, append-only history of entity snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Look up the identity record for `guid`.
    async fn find_identity(&self, guid: EntityGuid) -> Result<Option<Identity>, StoreError>;

    /// Append a snapshot, creating the identity first if it does not exist.
    ///
    /// `created_at` and the insertion-order `id` are assigned by the store.
    async fn append(
        &self,
        identity: &NewIdentity,
        fields: &ContentFields,
    ) -> Result<Snapshot, StoreError>;

    /// Create the identity and its first snapshot.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if `identity.guid` is taken.
    /// The existence check and the insert happen atomically.
    async fn create(
        &self,
        identity: &NewIdentity,
        fields: &ContentFields,
    ) -> Result<Snapshot, StoreError>;

    /// Append a snapshot to an identity that must already exist.
    ///
    /// Fails with [`StoreError::NotFound`] if `guid` is absent, so an update
    /// racing a delete never brings the identity back.
    async fn append_existing(
        &self,
        guid: EntityGuid,
        fields: &ContentFields,
    ) -> Result<Snapshot, StoreError>;

    /// The snapshot with the greatest `(created_at, id)`, if any.
    async fn latest(&self, guid: EntityGuid) -> Result<Option<Snapshot>, StoreError>;

    /// Every snapshot of `guid`, ascending by `(created_at, id)`.
    async fn history(&self, guid: EntityGuid) -> Result<Vec<Snapshot>, StoreError>;

    /// Number of snapshots recorded for `guid`.
    async fn snapshot_count(&self, guid: EntityGuid) -> Result<i64, StoreError>;

    /// Delete the identity and all of its snapshots in one step.
    async fn remove(&self, guid: EntityGuid) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HistoryState {
    identities: HashMap<EntityGuid, Identity>,
    snapshots: HashMap<EntityGuid, Vec<Snapshot>>,
    next_identity_id: DbId,
    next_snapshot_id: DbId,
}

impl HistoryState {
    fn insert_identity(&mut self, identity: &NewIdentity, created_at: Timestamp) {
        self.next_identity_id += 1;
        let record = Identity {
            id: self.next_identity_id,
            guid: identity.guid,
            kind: identity.kind,
            author_guid: identity.author_guid,
            parent_guid: identity.parent_guid,
            created_at,
        };
        self.identities.insert(identity.guid, record);
    }

    fn push_snapshot(
        &mut self,
        guid: EntityGuid,
        fields: &ContentFields,
        created_at: Timestamp,
    ) -> Snapshot {
        self.next_snapshot_id += 1;
        let snapshot = Snapshot {
            id: self.next_snapshot_id,
            entity_guid: guid,
            fields: fields.clone(),
            created_at,
        };
        self.snapshots.entry(guid).or_default().push(snapshot.clone());
        snapshot
    }
}

/// Process-local [`SnapshotStore`] for tests and single-process development.
///
/// Cheap to clone; clones share the same history.
#[derive(Clone)]
pub struct InMemorySnapshotStore {
    state: Arc<RwLock<HistoryState>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use `clock` to stamp new snapshots.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(HistoryState::default())),
            clock,
        }
    }

    /// Number of identities currently stored.
    pub async fn identity_count(&self) -> usize {
        self.state.read().await.identities.len()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn find_identity(&self, guid: EntityGuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.state.read().await.identities.get(&guid).cloned())
    }

    async fn append(
        &self,
        identity: &NewIdentity,
        fields: &ContentFields,
    ) -> Result<Snapshot, StoreError> {
        let created_at = self.clock.now();
        let mut state = self.state.write().await;
        if !state.identities.contains_key(&identity.guid) {
            state.insert_identity(identity, created_at);
        }
        Ok(state.push_snapshot(identity.guid, fields, created_at))
    }

    async fn create(
        &self,
        identity: &NewIdentity,
        fields: &ContentFields,
    ) -> Result<Snapshot, StoreError> {
        let created_at = self.clock.now();
        let mut state = self.state.write().await;
        if state.identities.contains_key(&identity.guid) {
            return Err(StoreError::AlreadyExists {
                guid: identity.guid,
            });
        }
        state.insert_identity(identity, created_at);
        Ok(state.push_snapshot(identity.guid, fields, created_at))
    }

    async fn append_existing(
        &self,
        guid: EntityGuid,
        fields: &ContentFields,
    ) -> Result<Snapshot, StoreError> {
        let created_at = self.clock.now();
        let mut state = self.state.write().await;
        if !state.identities.contains_key(&guid) {
            return Err(StoreError::NotFound { guid });
        }
        Ok(state.push_snapshot(guid, fields, created_at))
    }

    async fn latest(&self, guid: EntityGuid) -> Result<Option<Snapshot>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .get(&guid)
            .and_then(|list| list.iter().max_by(|a, b| a.version_cmp(b)))
            .cloned())
    }

    async fn history(&self, guid: EntityGuid) -> Result<Vec<Snapshot>, StoreError> {
        let state = self.state.read().await;
        let mut list = state.snapshots.get(&guid).cloned().unwrap_or_default();
        list.sort_by(|a, b| a.version_cmp(b));
        Ok(list)
    }

    async fn snapshot_count(&self, guid: EntityGuid) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state.snapshots.get(&guid).map_or(0, |list| list.len() as i64))
    }

    async fn remove(&self, guid: EntityGuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.identities.remove(&guid).is_none() {
            return Err(StoreError::NotFound { guid });
        }
        state.snapshots.remove(&guid);
        Ok(())
    }
}
