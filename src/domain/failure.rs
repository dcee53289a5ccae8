//! In-memory record of a finalization failure, keyed by the caller by
//! `uploadId` or `multipartId` (§3, §4.6).

use chrono::{DateTime, Utc};

use super::upload::UploadMetadata;

#[derive(Debug, Clone)]
pub struct FailedUpload {
    pub id: String,
    pub staged_path: std::path::PathBuf,
    pub metadata: UploadMetadata,
    pub last_error: String,
    pub last_attempt_at: DateTime<Utc>,
}

impl FailedUpload {
    pub fn new(
        id: String,
        staged_path: std::path::PathBuf,
        metadata: UploadMetadata,
        last_error: String,
    ) -> Self {
        Self {
            id,
            staged_path,
            metadata,
            last_error,
            last_attempt_at: Utc::now(),
        }
    }

    pub fn record_retry_failure(&mut self, error: String) {
        self.last_error = error;
        self.last_attempt_at = Utc::now();
    }
}
