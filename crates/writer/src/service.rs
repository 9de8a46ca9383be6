//! The write path for stories and comments.
//!
//! Every mutation follows the same order: validate, check the observed
//! version, persist, then publish. Publishing happens strictly after the
//! History Store has committed; a broker failure at that point is logged and
//! the mutation is still reported as successful.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use storyfeed_core::clock::{Clock, SystemClock};
use storyfeed_core::image::ImageUpload;
use storyfeed_core::types::{EntityGuid, Timestamp};
use storyfeed_core::{
    ConcurrencyGuard, ContentFields, EntityKind, Identity, NewIdentity, Snapshot, SnapshotStore,
    WriteError,
};
use storyfeed_events::{EventPublisher, Mutation};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A story submitted by an authenticated user.
#[derive(Debug, Clone, Deserialize)]
pub struct NewStory {
    pub guid: EntityGuid,
    pub author_guid: Option<EntityGuid>,
    pub title: String,
    pub body_text: String,
    pub image: Option<ImageUpload>,
}

/// Changes to a story. Empty fields keep their latest value.
#[derive(Debug, Clone, Deserialize)]
pub struct StoryUpdate {
    pub guid: EntityGuid,
    /// `created_at` of the snapshot the caller last read.
    pub observed: Timestamp,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    pub guid: EntityGuid,
    pub story_guid: EntityGuid,
    pub author_guid: Option<EntityGuid>,
    pub body_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentUpdate {
    pub guid: EntityGuid,
    pub observed: Timestamp,
    #[serde(default)]
    pub body_text: Option<String>,
}

// ---------------------------------------------------------------------------
// EntityService
// ---------------------------------------------------------------------------

/// Applies mutations to the History Store and announces them on the broker.
#[derive(Clone)]
pub struct EntityService {
    store: Arc<dyn SnapshotStore>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
}

impl EntityService {
    pub fn new(store: Arc<dyn SnapshotStore>, publisher: EventPublisher) -> Self {
        Self {
            store,
            publisher,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` when naming uploaded images.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// The current snapshot of `guid`.
    pub async fn current(&self, guid: EntityGuid) -> Result<Snapshot, WriteError> {
        self.store
            .latest(guid)
            .await?
            .ok_or(WriteError::NotFound { guid })
    }

    // ---- kind-agnostic operations ----

    /// Create an identity with its first snapshot.
    pub async fn create_entity(
        &self,
        identity: NewIdentity,
        fields: ContentFields,
    ) -> Result<Snapshot, WriteError> {
        let snapshot = self.persist_new(&identity, &fields).await?;
        self.publisher
            .notify(
                Mutation::Created(identity.kind),
                identity.guid,
                snapshot_payload(&identity, &snapshot),
            )
            .await;
        Ok(snapshot)
    }

    /// Append a new version of `guid`, provided nobody wrote after `observed`.
    pub async fn update_entity(
        &self,
        guid: EntityGuid,
        observed: Timestamp,
        fields: ContentFields,
    ) -> Result<Snapshot, WriteError> {
        let identity = self.identity_of(guid, None).await?;
        self.update_identity(&identity, observed, fields).await
    }

    /// Remove `guid` and its whole history.
    pub async fn delete_entity(&self, guid: EntityGuid) -> Result<(), WriteError> {
        let identity = self.identity_of(guid, None).await?;
        self.delete_identity(&identity).await
    }

    // ---- stories ----

    pub async fn create_story(&self, story: NewStory) -> Result<Snapshot, WriteError> {
        let image = self.name_image(story.guid, story.image)?;

        let mut identity = NewIdentity::new(story.guid, EntityKind::Story);
        identity.author_guid = story.author_guid;
        let mut fields = ContentFields::story(story.title, story.body_text);
        if let Some((filename, _)) = &image {
            fields = fields.with_img_url(filename.as_str());
        }

        let snapshot = self.create_entity(identity, fields).await?;
        if let Some((filename, upload)) = image {
            self.announce_image(story.guid, filename, upload).await;
        }
        Ok(snapshot)
    }

    pub async fn update_story(&self, update: StoryUpdate) -> Result<Snapshot, WriteError> {
        let identity = self.identity_of(update.guid, Some(EntityKind::Story)).await?;
        let image = self.name_image(update.guid, update.image)?;

        let fields = ContentFields {
            title: update.title,
            body_text: update.body_text,
            img_url: image.as_ref().map(|(filename, _)| filename.clone()),
        };

        let snapshot = self
            .update_identity(&identity, update.observed, fields)
            .await?;
        if let Some((filename, upload)) = image {
            self.announce_image(update.guid, filename, upload).await;
        }
        Ok(snapshot)
    }

    pub async fn delete_story(&self, guid: EntityGuid) -> Result<(), WriteError> {
        let identity = self.identity_of(guid, Some(EntityKind::Story)).await?;
        self.delete_identity(&identity).await
    }

    // ---- comments ----

    /// Attach a comment to an existing story.
    pub async fn create_comment(&self, comment: NewComment) -> Result<Snapshot, WriteError> {
        self.identity_of(comment.story_guid, Some(EntityKind::Story))
            .await?;

        let mut identity =
            NewIdentity::new(comment.guid, EntityKind::Comment).with_parent(comment.story_guid);
        identity.author_guid = comment.author_guid;

        let snapshot = self
            .create_entity(identity, ContentFields::comment(comment.body_text))
            .await?;
        self.publisher
            .notify(
                Mutation::CommentAttached,
                comment.guid,
                json!({
                    "story_guid": comment.story_guid,
                    "comment_guid": comment.guid,
                    "body_text": snapshot.fields.body_text,
                    "created_at": snapshot.created_at,
                }),
            )
            .await;
        Ok(snapshot)
    }

    pub async fn update_comment(&self, update: CommentUpdate) -> Result<Snapshot, WriteError> {
        let identity = self
            .identity_of(update.guid, Some(EntityKind::Comment))
            .await?;
        let fields = ContentFields {
            body_text: update.body_text,
            ..Default::default()
        };
        self.update_identity(&identity, update.observed, fields)
            .await
    }

    pub async fn delete_comment(&self, guid: EntityGuid) -> Result<(), WriteError> {
        let identity = self.identity_of(guid, Some(EntityKind::Comment)).await?;
        self.delete_identity(&identity).await
    }

    // ---- private helpers ----

    /// Load the identity of `guid`; a kind mismatch counts as not found.
    async fn identity_of(
        &self,
        guid: EntityGuid,
        expected: Option<EntityKind>,
    ) -> Result<Identity, WriteError> {
        match self.store.find_identity(guid).await? {
            Some(identity) if expected.map_or(true, |kind| kind == identity.kind) => Ok(identity),
            _ => Err(WriteError::NotFound { guid }),
        }
    }

    /// Create-only; the store rejects a taken guid atomically.
    async fn persist_new(
        &self,
        identity: &NewIdentity,
        fields: &ContentFields,
    ) -> Result<Snapshot, WriteError> {
        let snapshot = self.store.create(identity, fields).await?;
        log_appended(identity, &snapshot);
        Ok(snapshot)
    }

    async fn update_identity(
        &self,
        identity: &Identity,
        observed: Timestamp,
        fields: ContentFields,
    ) -> Result<Snapshot, WriteError> {
        let fields = ConcurrencyGuard::new(self.store.as_ref())
            .check_and_prepare(identity.guid, observed, fields)
            .await?
            .into_result(identity.guid)?;

        // Deleted since `identity_of`: NotFound, never a resurrection.
        let new_identity = NewIdentity::from(identity);
        let snapshot = self.store.append_existing(identity.guid, &fields).await?;
        log_appended(&new_identity, &snapshot);

        self.publisher
            .notify(
                Mutation::Updated(identity.kind),
                identity.guid,
                snapshot_payload(&new_identity, &snapshot),
            )
            .await;
        Ok(snapshot)
    }

    async fn delete_identity(&self, identity: &Identity) -> Result<(), WriteError> {
        self.store.remove(identity.guid).await?;
        tracing::info!(entity_guid = %identity.guid, kind = %identity.kind, "Entity removed");

        self.publisher
            .notify(
                Mutation::Deleted(identity.kind),
                identity.guid,
                json!({ "guid": identity.guid, "kind": identity.kind }),
            )
            .await;
        Ok(())
    }

    /// Derive the stored filename for an optional upload.
    fn name_image(
        &self,
        guid: EntityGuid,
        image: Option<ImageUpload>,
    ) -> Result<Option<(String, ImageUpload)>, WriteError> {
        image
            .map(|upload| -> Result<_, WriteError> {
                let filename = upload.filename(guid, self.clock.now())?;
                Ok((filename, upload))
            })
            .transpose()
    }

    async fn announce_image(&self, guid: EntityGuid, filename: String, upload: ImageUpload) {
        self.publisher
            .notify(
                Mutation::ImageAttached,
                guid,
                json!({
                    "filename": filename,
                    "content_type": upload.content_type,
                    "data": upload.data,
                }),
            )
            .await;
    }
}

fn log_appended(identity: &NewIdentity, snapshot: &Snapshot) {
    tracing::info!(
        entity_guid = %identity.guid,
        kind = %identity.kind,
        snapshot_id = snapshot.id,
        created_at = %snapshot.created_at,
        "Snapshot appended",
    );
}

fn snapshot_payload(identity: &NewIdentity, snapshot: &Snapshot) -> serde_json::Value {
    json!({
        "guid": snapshot.entity_guid,
        "kind": identity.kind,
        "author_guid": identity.author_guid,
        "parent_guid": identity.parent_guid,
        "title": snapshot.fields.title,
        "body_text": snapshot.fields.body_text,
        "img_url": snapshot.fields.img_url,
        "created_at": snapshot.created_at,
    })
}
