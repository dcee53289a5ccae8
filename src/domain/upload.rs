//! The staging record for a single resumable upload, its recognized
//! metadata, and the descriptor handed to the Finalization Orchestrator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client-supplied metadata at CREATE time. Recognized keys are typed
/// fields with documented defaults; anything else is preserved verbatim
/// in `extra` but never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadMetadata {
    pub user_id: String,
    pub stage: String,
    pub filename: String,
    pub relative_path: String,
    pub filetype: String,
    pub multipart_id: Option<String>,
    pub part_index: Option<i64>,
    pub total_parts: Option<u32>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl UploadMetadata {
    /// Builds a typed record from the raw key/value map a client sends at
    /// CREATE, applying the defaults from the recognized-keys table and
    /// carrying everything else through unchanged.
    pub fn from_raw(upload_id: &str, mut raw: HashMap<String, String>) -> Self {
        let filename = raw
            .remove("filename")
            .unwrap_or_else(|| upload_id.to_string());
        let relative_path = raw.remove("relativePath").unwrap_or_else(|| filename.clone());

        let user_id = raw.remove("userId").unwrap_or_else(|| "default-user".to_string());
        let stage = raw.remove("stage").unwrap_or_else(|| "raw".to_string());
        let filetype = raw
            .remove("filetype")
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let multipart_id = raw.remove("multipartId");
        let part_index = raw.remove("partIndex").and_then(|v| v.parse::<i64>().ok());
        let total_parts = raw.remove("totalParts").and_then(|v| v.parse::<u32>().ok());

        Self {
            user_id,
            stage,
            filename,
            relative_path,
            filetype,
            multipart_id,
            part_index,
            total_parts,
            extra: raw,
        }
    }

    /// True when this upload is declared as one part of a multi-part
    /// logical file, per the §4.4 routing decision.
    pub fn is_multipart_part(&self) -> bool {
        self.multipart_id.is_some()
            && self.part_index.is_some()
            && self.total_parts.is_some_and(|n| n > 1)
    }

    /// Flattens back to the raw string map the object-store adapter sends
    /// as user metadata headers (§4.2), using the same recognized keys
    /// `from_raw` consumes. `extra` entries pass through unchanged.
    pub fn to_headers(&self) -> HashMap<String, String> {
        let mut headers = self.extra.clone();
        headers.insert("userId".to_string(), self.user_id.clone());
        headers.insert("stage".to_string(), self.stage.clone());
        headers.insert("filename".to_string(), self.filename.clone());
        headers.insert("relativePath".to_string(), self.relative_path.clone());
        headers.insert("filetype".to_string(), self.filetype.clone());
        if let Some(multipart_id) = &self.multipart_id {
            headers.insert("multipartId".to_string(), multipart_id.clone());
        }
        if let Some(part_index) = self.part_index {
            headers.insert("partIndex".to_string(), part_index.to_string());
        }
        if let Some(total_parts) = self.total_parts {
            headers.insert("totalParts".to_string(), total_parts.to_string());
        }
        headers
    }
}

/// The on-disk sidecar record for one staged upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub upload_id: String,
    pub declared_length: u64,
    pub received_length: u64,
    pub metadata: UploadMetadata,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_activity_at: DateTime<Utc>,
    /// Set once the upload has been handed off to the Finalization
    /// Orchestrator, so a crash/restart cannot emit the finalization event
    /// a second time for the same upload (§4.3, §9's idempotence note).
    #[serde(default)]
    pub handed_off: bool,
}

impl UploadRecord {
    pub fn new(upload_id: String, declared_length: u64, metadata: UploadMetadata) -> Self {
        let now = Utc::now();
        Self {
            upload_id,
            declared_length,
            received_length: 0,
            metadata,
            created_at: now,
            last_activity_at: now,
            handed_off: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received_length == self.declared_length
    }
}

/// The object-store destination key for a finalized upload, per §3:
/// `users/<userId>/uploads/<uploadIdOrMultipartId>/<stage>/<relativePath>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn compute(user_id: &str, id: &str, stage: &str, relative_path: &str) -> Self {
        let relative_path = relative_path.trim_start_matches('/');
        Self(format!("users/{user_id}/uploads/{id}/{stage}/{relative_path}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single value type the Finalization Orchestrator accepts, produced
/// uniformly by the Protocol Endpoint (a just-completed upload) and by the
/// Operator Surface's "process pending" sweep (a staged body plus its
/// sidecar, or defaults if no sidecar exists). See §9's redesign flag and
/// §10.5.
#[derive(Debug, Clone)]
pub struct UploadDescriptor {
    pub upload_id: String,
    pub staged_path: std::path::PathBuf,
    pub size: u64,
    pub metadata: UploadMetadata,
}

impl UploadDescriptor {
    pub fn object_key(&self) -> ObjectKey {
        let id = self.metadata.multipart_id.as_deref().unwrap_or(&self.upload_id);
        ObjectKey::compute(
            &self.metadata.user_id,
            id,
            &self.metadata.stage,
            &self.metadata.relative_path,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_applies_documented_defaults() {
        let meta = UploadMetadata::from_raw("abc123", HashMap::new());
        assert_eq!(meta.user_id, "default-user");
        assert_eq!(meta.stage, "raw");
        assert_eq!(meta.filename, "abc123");
        assert_eq!(meta.relative_path, "abc123");
        assert_eq!(meta.filetype, "application/octet-stream");
        assert!(meta.multipart_id.is_none());
    }

    #[test]
    fn from_raw_preserves_unrecognized_keys_in_extra() {
        let mut raw = HashMap::new();
        raw.insert("filename".to_string(), "movie.mp4".to_string());
        raw.insert("customThing".to_string(), "keep-me".to_string());
        let meta = UploadMetadata::from_raw("abc123", raw);
        assert_eq!(meta.filename, "movie.mp4");
        assert_eq!(meta.extra.get("customThing"), Some(&"keep-me".to_string()));
    }

    #[test]
    fn is_multipart_part_requires_all_three_fields() {
        let mut raw = HashMap::new();
        raw.insert("multipartId".to_string(), "M".to_string());
        raw.insert("partIndex".to_string(), "0".to_string());
        let meta = UploadMetadata::from_raw("x", raw.clone());
        assert!(!meta.is_multipart_part(), "missing totalParts");

        raw.insert("totalParts".to_string(), "3".to_string());
        let meta = UploadMetadata::from_raw("x", raw);
        assert!(meta.is_multipart_part());
    }

    #[test]
    fn object_key_joins_in_documented_order() {
        let key = ObjectKey::compute("alice", "upload-1", "raw", "hi.txt");
        assert_eq!(key.as_str(), "users/alice/uploads/upload-1/raw/hi.txt");
    }

    #[test]
    fn object_key_strips_leading_slash_on_relative_path() {
        let key = ObjectKey::compute("alice", "upload-1", "raw", "/hi.txt");
        assert_eq!(key.as_str(), "users/alice/uploads/upload-1/raw/hi.txt");
    }
}
