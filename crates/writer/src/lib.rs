//! Write path of the storyfeed backend.
//!
//! A request layer embeds this crate through [`WriterState`], which holds the
//! [`service::EntityService`] wired to PostgreSQL and the AMQP broker. The
//! binary in `main.rs` builds the same state and runs it standalone.

pub mod config;
pub mod service;
pub mod state;
pub mod watchdog;

pub use config::{ConfigError, LogFormat, WriterConfig};
pub use service::{CommentUpdate, EntityService, NewComment, NewStory, StoryUpdate};
pub use state::WriterState;
pub use watchdog::BrokerWatchdog;
