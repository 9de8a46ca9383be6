//! Domain core of the storyfeed write path.
//!
//! Holds the versioned entity model, the History Store contract
//! ([`history::SnapshotStore`]), the optimistic
//! [`guard::ConcurrencyGuard`], and the error taxonomy reported upstream.

pub mod clock;
pub mod entity;
pub mod error;
pub mod guard;
pub mod history;
pub mod image;
pub mod types;

pub use entity::{ContentFields, EntityKind, Identity, NewIdentity, Snapshot};
pub use error::{StoreError, WriteError};
pub use guard::{ConcurrencyGuard, GuardDecision};
pub use history::{InMemorySnapshotStore, SnapshotStore};
