/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Externally visible identifier of one logical entity (story or comment).
pub type EntityGuid = uuid::Uuid;
