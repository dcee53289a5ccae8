//! Port for the durable local staging directory (§4.1).

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::UploadRecord;
use crate::error::GatewayResult;

#[derive(Debug, Clone)]
pub struct PendingFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Allocates a new upload record, writes its sidecar, and creates an
    /// empty body file. Returns the server-assigned `uploadId`.
    ///
    /// `raw_metadata` is the client's unparsed CREATE-time metadata map;
    /// the store assigns `uploadId` first and only then applies the
    /// recognized-keys defaults (`filename` defaults to the assigned
    /// `uploadId` itself, per §3), so the default can never be computed
    /// before the id it depends on exists.
    async fn create(
        &self,
        declared_length: u64,
        raw_metadata: HashMap<String, String>,
    ) -> GatewayResult<String>;

    /// Appends bytes at `offset`. Fails with `OffsetMismatch` if `offset`
    /// does not equal the current received length, and with
    /// `SizeExceeded` if the result would exceed the declared length or
    /// the configured global maximum. Returns the new received length.
    async fn append(&self, upload_id: &str, offset: u64, data: &[u8]) -> GatewayResult<u64>;

    /// Current sidecar state for an upload.
    async fn head(&self, upload_id: &str) -> GatewayResult<UploadRecord>;

    /// Marks an upload's sidecar as handed off to the Finalization
    /// Orchestrator, so the finalization event cannot be emitted twice for
    /// the same upload (§4.3, §9).
    async fn mark_handed_off(&self, upload_id: &str) -> GatewayResult<()>;

    /// Removes body and sidecar; idempotent.
    async fn delete(&self, upload_id: &str) -> GatewayResult<()>;

    /// Path to the staged body file, for callers (the assembler, the
    /// single-file finalization path) that need to stream it directly.
    fn body_path(&self, upload_id: &str) -> PathBuf;

    /// All staged body files not marked as assembled artifacts, for the
    /// Operator Surface's debug listing and "process pending" sweep.
    async fn list_pending(&self) -> GatewayResult<Vec<PendingFile>>;

    /// Opens a fresh staging file for a to-be-assembled artifact and
    /// returns its path; used by the Multi-part Assembler (§4.5 step 4a).
    fn assembled_path(&self, multipart_id: &str) -> PathBuf;
}
