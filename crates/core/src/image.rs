//! Image attachments carried alongside story writes.
//!
//! Image bytes are stored by a downstream consumer of the `new_images`
//! queue; the write path only names the file and forwards the payload.

use serde::{Deserialize, Serialize};

use crate::error::WriteError;
use crate::types::{EntityGuid, Timestamp};

/// An image submitted with a story create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUpload {
    /// Encoded image content, passed through untouched.
    pub data: String,
    /// MIME type, e.g. `image/png`.
    pub content_type: String,
}

impl ImageUpload {
    pub fn new(data: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
        }
    }

    /// Derive the stored filename: `{entity_guid}_{unix_millis}.{subtype}`.
    pub fn filename(&self, entity_guid: EntityGuid, at: Timestamp) -> Result<String, WriteError> {
        let extension = extension_for(&self.content_type)?;
        Ok(format!("{entity_guid}_{}.{extension}", at.timestamp_millis()))
    }
}

/// The MIME subtype used as file extension (`image/jpeg` -> `jpeg`).
pub fn extension_for(content_type: &str) -> Result<&str, WriteError> {
    match content_type.split_once('/') {
        Some((_, subtype)) if !subtype.trim().is_empty() => Ok(subtype.trim()),
        _ => Err(WriteError::Validation(format!(
            "content type '{content_type}' has no subtype"
        ))),
    }
}
