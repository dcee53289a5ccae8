//! The shared single-file finalization algorithm (§4.4 steps 1-7), reused
//! both for a plain single-file upload and for an already-assembled
//! multi-part artifact (§4.5 step 4b).

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::domain::ObjectKey;
use crate::error::{GatewayError, GatewayResult};
use crate::ports::{ObjectStoreClient, StagingStore};
use crate::sanitize::sanitize_headers;

/// Streams `body_path` to `object_key`, verifying the remote size before
/// returning. Never deletes anything itself -- callers own cleanup so they
/// can apply their own keep-on-failure policy (§4.4 step 8, §4.5 step 4d).
pub async fn finalize_body(
    object_store: &dyn ObjectStoreClient,
    object_key: &ObjectKey,
    body_path: &Path,
    raw_headers: HashMap<String, String>,
) -> GatewayResult<()> {
    let metadata = tokio::fs::metadata(body_path).await?;
    let size = metadata.len();
    if size == 0 {
        return Err(GatewayError::EmptyBody);
    }

    object_store.ensure_bucket().await?;

    let headers = sanitize_headers(raw_headers);
    object_store
        .put_stream(object_key.as_str(), body_path, size, headers)
        .await?;

    let stat = object_store.stat(object_key.as_str()).await?;
    if stat.size != size {
        return Err(GatewayError::RemotePermanent(format!(
            "size mismatch after upload: local {size} bytes, remote {} bytes",
            stat.size
        )));
    }

    info!(object_key = %object_key, size, "finalized upload");
    Ok(())
}

/// Deletes the local staged copy; callers call this only once
/// `finalize_body` has verified remote durability (the core durability
/// rule in §7).
pub async fn cleanup_local(staging: &dyn StagingStore, upload_id: &str) -> GatewayResult<()> {
    staging.delete(upload_id).await
}
