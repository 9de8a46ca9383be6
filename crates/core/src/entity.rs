//! Versioned content entities: identities and their immutable snapshots.
//!
//! An [`Identity`] names one story or comment. Each write appends a new
//! [`Snapshot`]; the current state of an identity is the snapshot with the
//! greatest `(created_at, id)` pair.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{DbId, EntityGuid, Timestamp};

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// The kinds of content the write path manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Story,
    Comment,
}

impl EntityKind {
    /// Lowercase name, as persisted and as used in queue names.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Story => "story",
            EntityKind::Comment => "comment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a persisted kind string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown entity kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "story" => Ok(EntityKind::Story),
            "comment" => Ok(EntityKind::Comment),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ContentFields
// ---------------------------------------------------------------------------

/// The mutable payload carried by each snapshot.
///
/// Stories use all three fields; comments only carry `body_text`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFields {
    pub title: Option<String>,
    pub body_text: Option<String>,
    pub img_url: Option<String>,
}

impl ContentFields {
    pub fn story(title: impl Into<String>, body_text: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body_text: Some(body_text.into()),
            img_url: None,
        }
    }

    pub fn comment(body_text: impl Into<String>) -> Self {
        Self {
            title: None,
            body_text: Some(body_text.into()),
            img_url: None,
        }
    }

    pub fn with_img_url(mut self, img_url: impl Into<String>) -> Self {
        self.img_url = Some(img_url.into());
        self
    }

    /// Fill every empty field (unset or `""`) from `previous`.
    ///
    /// Partial updates never erase fields the caller did not specify.
    pub fn merged_over(self, previous: &ContentFields) -> ContentFields {
        ContentFields {
            title: keep_or_inherit(self.title, &previous.title),
            body_text: keep_or_inherit(self.body_text, &previous.body_text),
            img_url: keep_or_inherit(self.img_url, &previous.img_url),
        }
    }
}

fn keep_or_inherit(proposed: Option<String>, previous: &Option<String>) -> Option<String> {
    match proposed {
        Some(value) if !value.is_empty() => Some(value),
        _ => previous.clone(),
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A persisted entity identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: DbId,
    pub guid: EntityGuid,
    pub kind: EntityKind,
    /// User that created the entity, as resolved by the auth layer.
    pub author_guid: Option<EntityGuid>,
    /// For comments, the story they belong to.
    pub parent_guid: Option<EntityGuid>,
    pub created_at: Timestamp,
}

/// Identity attributes supplied on the first write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub guid: EntityGuid,
    pub kind: EntityKind,
    pub author_guid: Option<EntityGuid>,
    pub parent_guid: Option<EntityGuid>,
}

impl NewIdentity {
    pub fn new(guid: EntityGuid, kind: EntityKind) -> Self {
        Self {
            guid,
            kind,
            author_guid: None,
            parent_guid: None,
        }
    }

    pub fn with_author(mut self, author_guid: EntityGuid) -> Self {
        self.author_guid = Some(author_guid);
        self
    }

    pub fn with_parent(mut self, parent_guid: EntityGuid) -> Self {
        self.parent_guid = Some(parent_guid);
        self
    }
}

impl From<&Identity> for NewIdentity {
    fn from(identity: &Identity) -> Self {
        Self {
            guid: identity.guid,
            kind: identity.kind,
            author_guid: identity.author_guid,
            parent_guid: identity.parent_guid,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable version of an entity's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Insertion-order id; breaks ties between equal `created_at` values.
    pub id: DbId,
    pub entity_guid: EntityGuid,
    #[serde(flatten)]
    pub fields: ContentFields,
    pub created_at: Timestamp,
}

impl Snapshot {
    /// Total order of snapshots within one identity.
    pub fn version_cmp(&self, other: &Snapshot) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [EntityKind::Story, EntityKind::Comment] {
            assert_eq!(kind.as_str().parse::<EntityKind>(), Ok(kind));
        }
        assert_eq!(
            "reaction".parse::<EntityKind>(),
            Err(UnknownKind("reaction".into()))
        );
    }

    #[test]
    fn merge_inherits_empty_and_unset_fields() {
        let previous = ContentFields::story("Old title", "Old body").with_img_url("a.png");
        let proposed = ContentFields {
            title: Some(String::new()),
            body_text: Some("New body".into()),
            img_url: None,
        };

        let merged = proposed.merged_over(&previous);
        assert_eq!(merged.title.as_deref(), Some("Old title"));
        assert_eq!(merged.body_text.as_deref(), Some("New body"));
        assert_eq!(merged.img_url.as_deref(), Some("a.png"));
    }

    #[test]
    fn merge_keeps_non_empty_fields() {
        let previous = ContentFields::story("Old", "Old");
        let proposed = ContentFields::story("New", "New").with_img_url("b.jpeg");
        assert_eq!(proposed.clone().merged_over(&previous), proposed);
    }

    #[test]
    fn version_order_breaks_ties_by_id() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let guid = uuid::Uuid::new_v4();
        let first = Snapshot {
            id: 1,
            entity_guid: guid,
            fields: ContentFields::default(),
            created_at: at,
        };
        let second = Snapshot { id: 2, ..first.clone() };
        assert_eq!(first.version_cmp(&second), Ordering::Less);

        let later = Snapshot {
            id: 0,
            created_at: at + chrono::Duration::milliseconds(1),
            ..first.clone()
        };
        assert_eq!(later.version_cmp(&second), Ordering::Greater);
    }

    #[test]
    fn snapshot_serializes_flat_fields() {
        let snapshot = Snapshot {
            id: 7,
            entity_guid: uuid::Uuid::nil(),
            fields: ContentFields::comment("hello"),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["body_text"], "hello");
        assert!(json["title"].is_null());
        assert_eq!(json["id"], 7);
    }
}
