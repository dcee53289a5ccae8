//! Filesystem-backed `StagingStore` (§4.1).
//!
//! Each upload's body lives at `<dir>/<uploadId>` and its sidecar at
//! `<dir>/<uploadId>.info`, a JSON-encoded `UploadRecord`. Appends are
//! serialized per `uploadId` via a small lock table so interleaved PATCH
//! requests for the same upload cannot race (§5): the protocol's
//! offset-equals-receivedLength rule is only meaningful if two appends for
//! the same upload never run concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{UploadMetadata, UploadRecord};
use crate::error::{GatewayError, GatewayResult};
use crate::ports::staging::{PendingFile, StagingStore};

const ASSEMBLED_PREFIX: &str = "assembled-";
const SIDECAR_SUFFIX: &str = ".info";

pub struct FsStagingStore {
    dir: PathBuf,
    max_size: u64,
    locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FsStagingStore {
    pub async fn new(dir: PathBuf, max_size: u64) -> GatewayResult<Self> {
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            max_size,
            locks: SyncMutex::new(HashMap::new()),
        })
    }

    fn sidecar_path(&self, upload_id: &str) -> PathBuf {
        self.dir.join(format!("{upload_id}{SIDECAR_SUFFIX}"))
    }

    fn lock_for(&self, upload_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn read_sidecar(&self, upload_id: &str) -> GatewayResult<UploadRecord> {
        let path = self.sidecar_path(upload_id);
        let data = fs::read(&path)
            .await
            .map_err(|_| GatewayError::NotFound(upload_id.to_string()))?;
        serde_json::from_slice(&data)
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!("corrupt sidecar for {upload_id}: {e}")))
    }

    /// Writes the sidecar via write-to-temp-then-rename plus an fsync of
    /// the body, so a crash leaves `receivedLength` underreported but
    /// never overreported (§4.1 crash-safety requirement).
    async fn write_sidecar(&self, record: &UploadRecord) -> GatewayResult<()> {
        let final_path = self.sidecar_path(&record.upload_id);
        let tmp_path = self.dir.join(format!("{}.info.tmp", record.upload_id));
        let data = serde_json::to_vec(record)
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!(e)))?;

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }
}

#[async_trait]
impl StagingStore for FsStagingStore {
    async fn create(
        &self,
        declared_length: u64,
        raw_metadata: HashMap<String, String>,
    ) -> GatewayResult<String> {
        if declared_length > self.max_size {
            return Err(GatewayError::SizeExceeded);
        }

        let upload_id = Uuid::new_v4().to_string();
        let metadata = UploadMetadata::from_raw(&upload_id, raw_metadata);
        let record = UploadRecord::new(upload_id.clone(), declared_length, metadata);

        fs::File::create(self.body_path(&upload_id)).await?;
        self.write_sidecar(&record).await?;

        debug!(upload_id = %upload_id, declared_length, "created staging record");
        Ok(upload_id)
    }

    async fn append(&self, upload_id: &str, offset: u64, data: &[u8]) -> GatewayResult<u64> {
        let lock = self.lock_for(upload_id);
        let _guard = lock.lock().await;

        let mut record = self.read_sidecar(upload_id).await?;

        if offset != record.received_length {
            return Err(GatewayError::OffsetMismatch {
                offset,
                received: record.received_length,
            });
        }

        let new_len = offset + data.len() as u64;
        if new_len > record.declared_length || new_len > self.max_size {
            return Err(GatewayError::SizeExceeded);
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(self.body_path(upload_id))
            .await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.sync_all().await?;

        record.received_length = new_len;
        record.last_activity_at = chrono::Utc::now();
        self.write_sidecar(&record).await?;

        Ok(new_len)
    }

    async fn head(&self, upload_id: &str) -> GatewayResult<UploadRecord> {
        self.read_sidecar(upload_id).await
    }

    async fn mark_handed_off(&self, upload_id: &str) -> GatewayResult<()> {
        let lock = self.lock_for(upload_id);
        let _guard = lock.lock().await;

        let mut record = self.read_sidecar(upload_id).await?;
        if record.handed_off {
            return Ok(());
        }
        record.handed_off = true;
        self.write_sidecar(&record).await
    }

    async fn delete(&self, upload_id: &str) -> GatewayResult<()> {
        let body = self.body_path(upload_id);
        let sidecar = self.sidecar_path(upload_id);

        for path in [&body, &sidecar] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.locks.lock().remove(upload_id);
        Ok(())
    }

    fn body_path(&self, upload_id: &str) -> PathBuf {
        self.dir.join(upload_id)
    }

    async fn list_pending(&self) -> GatewayResult<Vec<PendingFile>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut result = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(SIDECAR_SUFFIX) || name.ends_with(".info.tmp") {
                continue;
            }
            if name.starts_with(ASSEMBLED_PREFIX) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping unreadable staged file");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            result.push(PendingFile {
                name: name.clone(),
                path: entry.path(),
                size: metadata.len(),
            });
        }

        Ok(result)
    }

    fn assembled_path(&self, multipart_id: &str) -> PathBuf {
        self.dir.join(format!("{ASSEMBLED_PREFIX}{multipart_id}"))
    }
}

/// Rejects paths that would escape the staging directory, per §4.3's
/// guardrail against `..` and absolute-path escapes in sidecar-derived
/// paths.
pub fn is_safe_relative_path(path: &str) -> bool {
    let p = Path::new(path);
    !p.is_absolute() && !p.components().any(|c| matches!(c, std::path::Component::ParentDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn meta() -> HashMap<String, String> {
        HashMap::new()
    }

    #[tokio::test]
    async fn create_then_head_round_trips_declared_length() {
        let dir = TempDir::new().unwrap();
        let store = FsStagingStore::new(dir.path().to_path_buf(), 1024).await.unwrap();

        let id = store.create(11, meta()).await.unwrap();
        let record = store.head(&id).await.unwrap();
        assert_eq!(record.declared_length, 11);
        assert_eq!(record.received_length, 0);
    }

    #[tokio::test]
    async fn create_defaults_filename_to_the_assigned_upload_id() {
        let dir = TempDir::new().unwrap();
        let store = FsStagingStore::new(dir.path().to_path_buf(), 1024).await.unwrap();

        let id = store.create(4, HashMap::new()).await.unwrap();
        let record = store.head(&id).await.unwrap();
        assert_eq!(record.metadata.filename, id);
        assert_eq!(record.metadata.relative_path, id);
    }

    #[tokio::test]
    async fn append_at_correct_offset_advances_received_length() {
        let dir = TempDir::new().unwrap();
        let store = FsStagingStore::new(dir.path().to_path_buf(), 1024).await.unwrap();

        let id = store.create(11, meta()).await.unwrap();
        let new_len = store.append(&id, 0, b"hello world").await.unwrap();
        assert_eq!(new_len, 11);

        let body = fs::read(store.body_path(&id)).await.unwrap();
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn append_at_wrong_offset_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsStagingStore::new(dir.path().to_path_buf(), 1024).await.unwrap();

        let id = store.create(11, meta()).await.unwrap();
        store.append(&id, 0, b"hello ").await.unwrap();

        let err = store.append(&id, 0, b"world").await.unwrap_err();
        assert!(matches!(err, GatewayError::OffsetMismatch { .. }));
    }

    #[tokio::test]
    async fn append_past_declared_length_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsStagingStore::new(dir.path().to_path_buf(), 1024).await.unwrap();

        let id = store.create(5, meta()).await.unwrap();
        let err = store.append(&id, 0, b"too many bytes").await.unwrap_err();
        assert!(matches!(err, GatewayError::SizeExceeded));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FsStagingStore::new(dir.path().to_path_buf(), 1024).await.unwrap();

        let id = store.create(4, meta()).await.unwrap();
        store.delete(&id).await.unwrap();
        store.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn list_pending_excludes_sidecars_and_assembled_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = FsStagingStore::new(dir.path().to_path_buf(), 1024).await.unwrap();

        let id = store.create(4, meta()).await.unwrap();
        fs::write(store.assembled_path("M"), b"assembled").await.unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, id);
    }

    #[test]
    fn safe_relative_path_rejects_traversal_and_absolute() {
        assert!(is_safe_relative_path("docs/file.txt"));
        assert!(!is_safe_relative_path("../escape.txt"));
        assert!(!is_safe_relative_path("/etc/passwd"));
    }
}
