//! Mutation → queue routing table.
//!
//! This is the only place queue names are derived from mutations; the
//! [`EventPublisher`](crate::EventPublisher) looks every route up here.

use storyfeed_core::entity::EntityKind;

/// A committed change that downstream consumers are told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutation {
    Created(EntityKind),
    Updated(EntityKind),
    Deleted(EntityKind),
    /// A new image was named for a story snapshot.
    ImageAttached,
    /// A new comment was attached to an existing story.
    CommentAttached,
}

impl Mutation {
    /// Every routable mutation.
    pub const ALL: [Mutation; 8] = [
        Mutation::Created(EntityKind::Story),
        Mutation::Created(EntityKind::Comment),
        Mutation::Updated(EntityKind::Story),
        Mutation::Updated(EntityKind::Comment),
        Mutation::Deleted(EntityKind::Story),
        Mutation::Deleted(EntityKind::Comment),
        Mutation::ImageAttached,
        Mutation::CommentAttached,
    ];

    /// Destination queue: `new_{kind}s`, `update_{kind}_info`,
    /// `delete_{kind}`, `new_images`, `new_comment_on_story`.
    pub fn queue(self) -> &'static str {
        match self {
            Mutation::Created(EntityKind::Story) => "new_stories",
            Mutation::Created(EntityKind::Comment) => "new_comments",
            Mutation::Updated(EntityKind::Story) => "update_story_info",
            Mutation::Updated(EntityKind::Comment) => "update_comment_info",
            Mutation::Deleted(EntityKind::Story) => "delete_story",
            Mutation::Deleted(EntityKind::Comment) => "delete_comment",
            Mutation::ImageAttached => "new_images",
            Mutation::CommentAttached => "new_comment_on_story",
        }
    }

    /// Dot-separated event name carried in the envelope.
    pub fn event_type(self) -> &'static str {
        match self {
            Mutation::Created(EntityKind::Story) => "story.created",
            Mutation::Created(EntityKind::Comment) => "comment.created",
            Mutation::Updated(EntityKind::Story) => "story.updated",
            Mutation::Updated(EntityKind::Comment) => "comment.updated",
            Mutation::Deleted(EntityKind::Story) => "story.deleted",
            Mutation::Deleted(EntityKind::Comment) => "comment.deleted",
            Mutation::ImageAttached => "image.attached",
            Mutation::CommentAttached => "comment.attached",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::topology::TOPOLOGY_QUEUES;

    #[test]
    fn every_route_targets_a_declared_queue() {
        for mutation in Mutation::ALL {
            assert!(
                TOPOLOGY_QUEUES.contains(&mutation.queue()),
                "{mutation:?} routes to undeclared queue {}",
                mutation.queue()
            );
        }
    }

    #[test]
    fn routes_are_distinct() {
        let queues: HashSet<_> = Mutation::ALL.iter().map(|m| m.queue()).collect();
        let types: HashSet<_> = Mutation::ALL.iter().map(|m| m.event_type()).collect();
        assert_eq!(queues.len(), Mutation::ALL.len());
        assert_eq!(types.len(), Mutation::ALL.len());
    }

    #[test]
    fn entity_routes_follow_naming_pattern() {
        for kind in [EntityKind::Story, EntityKind::Comment] {
            assert_eq!(
                Mutation::Updated(kind).queue(),
                format!("update_{}_info", kind.as_str())
            );
            assert_eq!(
                Mutation::Deleted(kind).queue(),
                format!("delete_{}", kind.as_str())
            );
        }
        assert_eq!(Mutation::Created(EntityKind::Story).queue(), "new_stories");
        assert_eq!(Mutation::Created(EntityKind::Comment).queue(), "new_comments");
    }
}
