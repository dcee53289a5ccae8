//! The Finalization Orchestrator (§4.4): routes a finalized upload to the
//! single-file path or to the multi-part assembler, and is the only
//! writer of the Failure Registry.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::application::assembler::{MultipartAssembler, PartOutcome};
use crate::application::finalize::{cleanup_local, finalize_body};
use crate::application::registry::FailureRegistry;
use crate::domain::{ObjectKey, PartRef, UploadDescriptor};
use crate::error::{GatewayError, GatewayResult};
use crate::ports::{ObjectStoreClient, StagingStore};

pub struct FinalizationOrchestrator {
    staging: Arc<dyn StagingStore>,
    object_store: Arc<dyn ObjectStoreClient>,
    assembler: Arc<MultipartAssembler>,
    registry: Arc<FailureRegistry>,
}

impl FinalizationOrchestrator {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        object_store: Arc<dyn ObjectStoreClient>,
        assembler: Arc<MultipartAssembler>,
        registry: Arc<FailureRegistry>,
    ) -> Self {
        Self {
            staging,
            object_store,
            assembler,
            registry,
        }
    }

    /// Routes a finalized upload to the single-file path or the
    /// multi-part assembler (§4.4 routing decision).
    pub async fn finalize(&self, descriptor: UploadDescriptor) -> GatewayResult<()> {
        if descriptor.metadata.is_multipart_part() {
            self.finalize_part(descriptor).await
        } else {
            self.finalize_single(descriptor).await
        }
    }

    /// §4.4 steps 1-8.
    async fn finalize_single(&self, descriptor: UploadDescriptor) -> GatewayResult<()> {
        let object_key = descriptor.object_key();
        let headers = descriptor.metadata.to_headers();

        match finalize_body(
            self.object_store.as_ref(),
            &object_key,
            &descriptor.staged_path,
            headers,
        )
        .await
        {
            Ok(()) => {
                cleanup_local(self.staging.as_ref(), &descriptor.upload_id).await?;
                self.registry.remove(&descriptor.upload_id);
                Ok(())
            }
            Err(e) => {
                error!(upload_id = %descriptor.upload_id, error = %e, "single-file finalization failed");
                self.registry.record_failure(
                    descriptor.upload_id.clone(),
                    descriptor.staged_path.clone(),
                    descriptor.metadata.clone(),
                    e.to_string(),
                );
                Err(e)
            }
        }
    }

    /// §4.5: records the arriving part, and once the assembly is complete,
    /// concatenates and uploads via the single-file path.
    async fn finalize_part(&self, descriptor: UploadDescriptor) -> GatewayResult<()> {
        let multipart_id = descriptor
            .metadata
            .multipart_id
            .clone()
            .expect("is_multipart_part verified multipart_id is present");
        let part_index = descriptor
            .metadata
            .part_index
            .expect("is_multipart_part verified part_index is present");
        let total_parts = descriptor
            .metadata
            .total_parts
            .expect("is_multipart_part verified total_parts is present");

        let part_ref = PartRef {
            upload_id: descriptor.upload_id.clone(),
            staged_path: descriptor.staged_path.clone(),
        };

        let outcome = self.assembler.on_part_arrival(
            &multipart_id,
            part_index,
            total_parts,
            part_ref,
            descriptor.metadata.clone(),
        );

        match outcome {
            Err(conflict) => {
                for part in &conflict.stale_parts {
                    if let Err(e) = self.staging.delete(&part.upload_id).await {
                        warn!(upload_id = %part.upload_id, error = %e, "failed to delete stale part body");
                    }
                }
                let err = GatewayError::PartMetadataConflict {
                    multipart_id: conflict.multipart_id.clone(),
                    reason: conflict.reason.clone(),
                };
                self.registry.record_failure(
                    conflict.multipart_id,
                    self.staging.assembled_path(&multipart_id),
                    descriptor.metadata,
                    err.to_string(),
                );
                Err(err)
            }
            Ok(PartOutcome::Accepted { replaced }) => {
                if let Some(old) = replaced {
                    if let Err(e) = self.staging.delete(&old.upload_id).await {
                        warn!(upload_id = %old.upload_id, error = %e, "failed to delete superseded part body");
                    }
                }
                Ok(())
            }
            Ok(PartOutcome::ReadyToAssemble { parts, metadata, replaced }) => {
                if let Some(old) = replaced {
                    if let Err(e) = self.staging.delete(&old.upload_id).await {
                        warn!(upload_id = %old.upload_id, error = %e, "failed to delete superseded part body");
                    }
                }
                self.assemble_and_upload(&multipart_id, parts, metadata).await
            }
        }
    }

    /// Forces the Single-File finalization algorithm on `descriptor`,
    /// bypassing the multipart routing decision in `finalize`. Used by the
    /// Operator Surface's retry and process-pending paths (§4.6), which
    /// reprocess a staged body or an already-assembled multi-part artifact
    /// directly and must not re-enter part bookkeeping.
    pub async fn finalize_direct(&self, descriptor: UploadDescriptor) -> GatewayResult<()> {
        let object_key = descriptor.object_key();
        let headers = descriptor.metadata.to_headers();
        let id = descriptor
            .metadata
            .multipart_id
            .clone()
            .unwrap_or_else(|| descriptor.upload_id.clone());

        match finalize_body(self.object_store.as_ref(), &object_key, &descriptor.staged_path, headers).await {
            Ok(()) => {
                match tokio::fs::remove_file(&descriptor.staged_path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(
                        path = %descriptor.staged_path.display(),
                        error = %e,
                        "failed to remove staged artifact after retry"
                    ),
                }
                if let Err(e) = self.staging.delete(&id).await {
                    warn!(id = %id, error = %e, "failed to delete staging sidecar after retry");
                }
                self.registry.remove(&id);
                info!(id = %id, object_key = %object_key, "finalized via operator-driven retry/sweep");
                Ok(())
            }
            Err(e) => {
                error!(id = %id, error = %e, "operator-driven finalization failed");
                self.registry.record_failure(
                    id,
                    descriptor.staged_path.clone(),
                    descriptor.metadata.clone(),
                    e.to_string(),
                );
                Err(e)
            }
        }
    }

    async fn assemble_and_upload(
        &self,
        multipart_id: &str,
        parts: Vec<(i64, PartRef)>,
        metadata: crate::domain::UploadMetadata,
    ) -> GatewayResult<()> {
        let assembled_path = self.staging.assembled_path(multipart_id);

        if let Err(e) = concatenate_parts(multipart_id, &assembled_path, &parts).await {
            let _ = tokio::fs::remove_file(&assembled_path).await;
            // PART_MISSING_ON_ASSEMBLE gets the same treatment as
            // PART_METADATA_CONFLICT (§7): the assembly is unrecoverable,
            // so the part bodies are deleted rather than kept for retry.
            for (_, part) in &parts {
                if let Err(e) = self.staging.delete(&part.upload_id).await {
                    warn!(upload_id = %part.upload_id, error = %e, "failed to delete part body after assembly failure");
                }
            }
            error!(multipart_id, error = %e, "assembly failed, part bodies deleted");
            self.registry.record_failure(
                multipart_id.to_string(),
                assembled_path,
                metadata,
                e.to_string(),
            );
            return Err(e);
        }

        let object_key = ObjectKey::compute(
            &metadata.user_id,
            multipart_id,
            &metadata.stage,
            &metadata.relative_path,
        );
        let headers = metadata.to_headers();

        match finalize_body(self.object_store.as_ref(), &object_key, &assembled_path, headers).await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&assembled_path).await;
                for (_, part) in &parts {
                    if let Err(e) = self.staging.delete(&part.upload_id).await {
                        warn!(upload_id = %part.upload_id, error = %e, "failed to delete assembled part body");
                    }
                }
                self.registry.remove(multipart_id);
                info!(multipart_id, part_count = parts.len(), "multi-part assembly finalized");
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&assembled_path).await;
                error!(multipart_id, error = %e, "assembled artifact finalization failed, part bodies kept");
                self.registry.record_failure(
                    multipart_id.to_string(),
                    self.staging.assembled_path(multipart_id),
                    metadata,
                    e.to_string(),
                );
                Err(e)
            }
        }
    }
}

/// Concatenates parts in the order given (the caller has already sorted
/// them ascending by numeric `partIndex`) into a fresh file at
/// `assembled_path`.
/// Streams each part's staged body directly into the assembled file, one
/// part at a time, so the fan-in never holds a whole part (let alone the
/// whole artifact) in memory at once.
async fn concatenate_parts(
    multipart_id: &str,
    assembled_path: &std::path::Path,
    parts: &[(i64, PartRef)],
) -> GatewayResult<()> {
    let mut out = tokio::fs::File::create(assembled_path).await?;
    for (part_index, part) in parts {
        let part_file = tokio::fs::File::open(&part.staged_path).await.map_err(|_| {
            GatewayError::PartMissingOnAssemble {
                multipart_id: multipart_id.to_string(),
                part_index: *part_index,
            }
        })?;
        let mut reader = tokio::io::BufReader::new(part_file);
        tokio::io::copy(&mut reader, &mut out).await.map_err(|_| {
            GatewayError::PartMissingOnAssemble {
                multipart_id: multipart_id.to_string(),
                part_index: *part_index,
            }
        })?;
    }
    out.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FsStagingStore;
    use crate::ports::{ObjectStat, ObjectStoreClient};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    /// A fake `ObjectStoreClient` that can be told to lie about the
    /// remote size on `stat`, for exercising §8 scenario 5 (remote
    /// verification mismatch) without a real backend capable of lying.
    struct LyingObjectStore {
        reported_size: AtomicU64,
    }

    #[async_trait]
    impl ObjectStoreClient for LyingObjectStore {
        async fn ensure_bucket(&self) -> GatewayResult<()> {
            Ok(())
        }
        async fn put_stream(
            &self,
            _object_key: &str,
            _path: &Path,
            _size: u64,
            _headers: HashMap<String, String>,
        ) -> GatewayResult<()> {
            Ok(())
        }
        async fn stat(&self, _object_key: &str) -> GatewayResult<ObjectStat> {
            Ok(ObjectStat { size: self.reported_size.load(Ordering::SeqCst), etag: None })
        }
        async fn is_reachable(&self) -> bool {
            true
        }
    }

    async fn test_orchestrator(
        dir: &TempDir,
        object_store: Arc<dyn ObjectStoreClient>,
    ) -> (FinalizationOrchestrator, Arc<FsStagingStore>) {
        let staging = Arc::new(FsStagingStore::new(dir.path().to_path_buf(), 1_000_000).await.unwrap());
        let assembler = Arc::new(MultipartAssembler::new());
        let registry = Arc::new(FailureRegistry::new(100));
        let orchestrator = FinalizationOrchestrator::new(
            staging.clone(),
            object_store,
            assembler,
            registry.clone(),
        );
        (orchestrator, staging)
    }

    fn meta(raw: Vec<(&str, &str)>) -> HashMap<String, String> {
        raw.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    /// Creates an upload, appends its full body, and returns a descriptor
    /// built from the staging store's own recorded metadata -- mirroring
    /// how the protocol endpoint constructs one in `do_patch_upload`.
    async fn create_and_describe(
        staging: &FsStagingStore,
        raw: Vec<(&str, &str)>,
        body: &[u8],
    ) -> UploadDescriptor {
        let upload_id = staging.create(body.len() as u64, meta(raw)).await.unwrap();
        staging.append(&upload_id, 0, body).await.unwrap();
        let record = staging.head(&upload_id).await.unwrap();
        UploadDescriptor {
            upload_id: upload_id.clone(),
            staged_path: staging.body_path(&upload_id),
            size: record.declared_length,
            metadata: record.metadata,
        }
    }

    #[tokio::test]
    async fn single_file_happy_path_deletes_staged_bytes() {
        let dir = TempDir::new().unwrap();
        let backend_dir = TempDir::new().unwrap();
        let object_store: Arc<dyn ObjectStoreClient> =
            Arc::new(crate::adapters::OpendalObjectStore::new_fs(backend_dir.path()).unwrap());
        let (orchestrator, staging) = test_orchestrator(&dir, object_store).await;

        let descriptor = create_and_describe(
            &staging,
            vec![("userId", "alice"), ("stage", "raw"), ("filename", "hi.txt")],
            b"hello world",
        )
        .await;
        let upload_id = descriptor.upload_id.clone();

        orchestrator.finalize(descriptor).await.unwrap();
        assert!(!staging.body_path(&upload_id).exists());
    }

    #[tokio::test]
    async fn remote_verification_mismatch_keeps_staged_body_and_records_failure() {
        let dir = TempDir::new().unwrap();
        let lying_store: Arc<dyn ObjectStoreClient> =
            Arc::new(LyingObjectStore { reported_size: AtomicU64::new(0) });
        let (orchestrator, staging) = test_orchestrator(&dir, lying_store).await;

        let descriptor = create_and_describe(
            &staging,
            vec![("userId", "alice"), ("filename", "hi.txt")],
            b"hello world",
        )
        .await;
        let upload_id = descriptor.upload_id.clone();

        let err = orchestrator.finalize(descriptor).await.unwrap_err();
        assert!(matches!(err, GatewayError::RemotePermanent(_)));
        assert!(staging.body_path(&upload_id).exists(), "staged body must survive a failed verify");
    }

    #[tokio::test]
    async fn three_part_assembly_out_of_order_concatenates_ascending() {
        let dir = TempDir::new().unwrap();
        let backend_dir = TempDir::new().unwrap();
        let object_store: Arc<dyn ObjectStoreClient> =
            Arc::new(crate::adapters::OpendalObjectStore::new_fs(backend_dir.path()).unwrap());
        let (orchestrator, staging) = test_orchestrator(&dir, object_store).await;

        let parts: Vec<(i64, &[u8])> = vec![(2, b"CC"), (0, b"AA"), (1, b"BB")];
        for (index, bytes) in parts {
            let descriptor = create_and_describe(
                &staging,
                vec![
                    ("userId", "alice"),
                    ("filename", "big.bin"),
                    ("multipartId", "M"),
                    ("partIndex", &index.to_string()),
                    ("totalParts", "3"),
                ],
                bytes,
            )
            .await;
            orchestrator.finalize(descriptor).await.unwrap();
        }
    }

    #[tokio::test]
    async fn part_metadata_conflict_drops_assembly_and_deletes_both_parts() {
        let dir = TempDir::new().unwrap();
        let backend_dir = TempDir::new().unwrap();
        let object_store: Arc<dyn ObjectStoreClient> =
            Arc::new(crate::adapters::OpendalObjectStore::new_fs(backend_dir.path()).unwrap());
        let (orchestrator, staging) = test_orchestrator(&dir, object_store).await;

        let descriptor0 = create_and_describe(
            &staging,
            vec![("filename", "a.bin"), ("multipartId", "M"), ("partIndex", "0"), ("totalParts", "3")],
            b"a",
        )
        .await;
        let id0 = descriptor0.upload_id.clone();
        orchestrator.finalize(descriptor0).await.unwrap();

        let descriptor1 = create_and_describe(
            &staging,
            vec![("filename", "a.bin"), ("multipartId", "M"), ("partIndex", "1"), ("totalParts", "4")],
            b"b",
        )
        .await;
        let id1 = descriptor1.upload_id.clone();

        let err = orchestrator.finalize(descriptor1).await.unwrap_err();
        assert!(matches!(err, GatewayError::PartMetadataConflict { .. }));
        assert!(!staging.body_path(&id0).exists());
        assert!(!staging.body_path(&id1).exists());
    }

    #[tokio::test]
    async fn part_missing_on_assemble_drops_assembly_and_deletes_remaining_parts() {
        let dir = TempDir::new().unwrap();
        let backend_dir = TempDir::new().unwrap();
        let object_store: Arc<dyn ObjectStoreClient> =
            Arc::new(crate::adapters::OpendalObjectStore::new_fs(backend_dir.path()).unwrap());
        let (orchestrator, staging) = test_orchestrator(&dir, object_store).await;

        let descriptor0 = create_and_describe(
            &staging,
            vec![("filename", "big.bin"), ("multipartId", "M"), ("partIndex", "0"), ("totalParts", "3")],
            b"a",
        )
        .await;
        let id0 = descriptor0.upload_id.clone();
        orchestrator.finalize(descriptor0).await.unwrap();

        let descriptor1 = create_and_describe(
            &staging,
            vec![("filename", "big.bin"), ("multipartId", "M"), ("partIndex", "1"), ("totalParts", "3")],
            b"b",
        )
        .await;
        let id1 = descriptor1.upload_id.clone();
        orchestrator.finalize(descriptor1).await.unwrap();

        // Simulate corruption: part 0's staged body vanishes from disk
        // before the last part arrives.
        tokio::fs::remove_file(staging.body_path(&id0)).await.unwrap();

        let descriptor2 = create_and_describe(
            &staging,
            vec![("filename", "big.bin"), ("multipartId", "M"), ("partIndex", "2"), ("totalParts", "3")],
            b"c",
        )
        .await;
        let id2 = descriptor2.upload_id.clone();

        let err = orchestrator.finalize(descriptor2).await.unwrap_err();
        assert!(matches!(err, GatewayError::PartMissingOnAssemble { .. }));
        assert!(!staging.body_path(&id1).exists(), "surviving part bodies must be deleted, not kept for retry");
        assert!(!staging.body_path(&id2).exists());
    }

    #[tokio::test]
    async fn finalize_direct_retries_a_failed_upload_and_clears_the_registry() {
        let dir = TempDir::new().unwrap();
        let lying_store = Arc::new(LyingObjectStore { reported_size: AtomicU64::new(0) });
        let object_store: Arc<dyn ObjectStoreClient> = lying_store.clone();
        let (orchestrator, staging) = test_orchestrator(&dir, object_store).await;

        let descriptor = create_and_describe(
            &staging,
            vec![("userId", "alice"), ("filename", "hi.txt")],
            b"hello world",
        )
        .await;
        let upload_id = descriptor.upload_id.clone();
        orchestrator.finalize(descriptor.clone()).await.unwrap_err();
        assert!(staging.body_path(&upload_id).exists());

        lying_store.reported_size.store(11, Ordering::SeqCst);
        orchestrator.finalize_direct(descriptor).await.unwrap();
        assert!(!staging.body_path(&upload_id).exists());
    }
}
