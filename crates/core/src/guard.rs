//! Timestamp-based optimistic concurrency check.
//!
//! The guard stops a writer from overwriting a version it never observed.
//! It takes no locks: two writers that observed the same latest snapshot can
//! both be accepted, and the later append becomes the new latest.

use crate::entity::{ContentFields, Snapshot};
use crate::error::{StoreError, WriteError};
use crate::history::SnapshotStore;
use crate::types::{EntityGuid, Timestamp};

/// Result of [`ConcurrencyGuard::check_and_prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// The write may proceed with `fields` (already merged over `previous`).
    Accepted {
        fields: ContentFields,
        previous: Option<Snapshot>,
    },
    /// Another writer advanced the entity past `observed`.
    Rejected {
        observed: Timestamp,
        latest: Timestamp,
    },
}

impl GuardDecision {
    /// Turn a rejection into [`WriteError::StaleWrite`].
    pub fn into_result(self, guid: EntityGuid) -> Result<ContentFields, WriteError> {
        match self {
            GuardDecision::Accepted { fields, .. } => Ok(fields),
            GuardDecision::Rejected { observed, latest } => Err(WriteError::StaleWrite {
                guid,
                observed,
                latest,
            }),
        }
    }
}

/// Decides whether a proposed mutation may be appended.
pub struct ConcurrencyGuard<'a, S: SnapshotStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SnapshotStore + ?Sized> ConcurrencyGuard<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Read the latest snapshot of `guid` and judge the proposed write.
    ///
    /// * No history: always accepted (first write), fields pass through.
    /// * `latest.created_at > observed`: rejected.
    /// * Otherwise accepted, with empty fields filled from the latest snapshot.
    pub async fn check_and_prepare(
        &self,
        guid: EntityGuid,
        observed: Timestamp,
        proposed: ContentFields,
    ) -> Result<GuardDecision, StoreError> {
        let Some(latest) = self.store.latest(guid).await? else {
            return Ok(GuardDecision::Accepted {
                fields: proposed,
                previous: None,
            });
        };

        if latest.created_at > observed {
            tracing::info!(
                entity_guid = %guid,
                observed = %observed,
                latest = %latest.created_at,
                "Rejecting stale write",
            );
            return Ok(GuardDecision::Rejected {
                observed,
                latest: latest.created_at,
            });
        }

        Ok(GuardDecision::Accepted {
            fields: proposed.merged_over(&latest.fields),
            previous: Some(latest),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::{EntityKind, NewIdentity};
    use crate::history::InMemorySnapshotStore;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone, Utc};

    fn fixture() -> (InMemorySnapshotStore, Arc<ManualClock>, EntityGuid) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 2, 10, 8, 30, 0).unwrap(),
        ));
        (
            InMemorySnapshotStore::with_clock(clock.clone()),
            clock,
            uuid::Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn accepts_first_write_regardless_of_observed() {
        let (store, _clock, guid) = fixture();
        let guard = ConcurrencyGuard::new(&store);
        let long_ago = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();

        let decision = guard
            .check_and_prepare(guid, long_ago, ContentFields::story("a", "b"))
            .await
            .unwrap();
        assert_eq!(
            decision,
            GuardDecision::Accepted {
                fields: ContentFields::story("a", "b"),
                previous: None,
            }
        );
    }

    #[tokio::test]
    async fn rejects_when_latest_is_newer_than_observed() {
        let (store, clock, guid) = fixture();
        let identity = NewIdentity::new(guid, EntityKind::Story);
        let t1 = store
            .append(&identity, &ContentFields::story("a", ""))
            .await
            .unwrap()
            .created_at;
        clock.advance(Duration::seconds(1));
        let t2 = store
            .append(&identity, &ContentFields::story("b", ""))
            .await
            .unwrap()
            .created_at;

        let decision = ConcurrencyGuard::new(&store)
            .check_and_prepare(guid, t1, ContentFields::story("c", ""))
            .await
            .unwrap();
        assert_eq!(
            decision,
            GuardDecision::Rejected {
                observed: t1,
                latest: t2
            }
        );
        assert_matches!(
            decision.into_result(guid),
            Err(WriteError::StaleWrite { observed, latest, .. }) if observed == t1 && latest == t2
        );
    }

    #[tokio::test]
    async fn accepts_when_observed_equals_latest_and_merges_fields() {
        let (store, _clock, guid) = fixture();
        let identity = NewIdentity::new(guid, EntityKind::Story);
        let first = store
            .append(
                &identity,
                &ContentFields::story("Title", "Body").with_img_url("x.png"),
            )
            .await
            .unwrap();

        let proposed = ContentFields {
            title: Some(String::new()),
            body_text: Some("Edited".into()),
            img_url: None,
        };
        let decision = ConcurrencyGuard::new(&store)
            .check_and_prepare(guid, first.created_at, proposed)
            .await
            .unwrap();

        let fields = decision.into_result(guid).unwrap();
        assert_eq!(fields.title.as_deref(), Some("Title"));
        assert_eq!(fields.body_text.as_deref(), Some("Edited"));
        assert_eq!(fields.img_url.as_deref(), Some("x.png"));
    }

    #[tokio::test]
    async fn accepts_when_observed_is_after_latest() {
        let (store, _clock, guid) = fixture();
        let first = store
            .append(
                &NewIdentity::new(guid, EntityKind::Comment),
                &ContentFields::comment("hi"),
            )
            .await
            .unwrap();

        let decision = ConcurrencyGuard::new(&store)
            .check_and_prepare(
                guid,
                first.created_at + Duration::hours(1),
                ContentFields::comment("hello"),
            )
            .await
            .unwrap();
        assert_matches!(decision, GuardDecision::Accepted { previous: Some(p), .. } if p == first);
    }

    #[tokio::test]
    async fn rejection_leaves_history_untouched() {
        let (store, clock, guid) = fixture();
        let identity = NewIdentity::new(guid, EntityKind::Story);
        let t1 = store
            .append(&identity, &ContentFields::story("a", ""))
            .await
            .unwrap()
            .created_at;
        clock.advance(Duration::milliseconds(1));
        store
            .append(&identity, &ContentFields::story("b", ""))
            .await
            .unwrap();

        let before = store.snapshot_count(guid).await.unwrap();
        let decision = ConcurrencyGuard::new(&store)
            .check_and_prepare(guid, t1, ContentFields::story("c", ""))
            .await
            .unwrap();
        assert_matches!(decision, GuardDecision::Rejected { .. });
        assert_eq!(store.snapshot_count(guid).await.unwrap(), before);
    }
}
