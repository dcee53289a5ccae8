//! Port for the S3-compatible object store (§4.2).

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::GatewayResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub etag: Option<String>,
}

#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Idempotent bucket creation/verification.
    async fn ensure_bucket(&self) -> GatewayResult<()>;

    /// Streams the file at `path` to `object_key`, retrying transient
    /// failures per the policy in §4.2. `headers` must already be
    /// sanitized by the caller (see `crate::sanitize`).
    async fn put_stream(
        &self,
        object_key: &str,
        path: &Path,
        size: u64,
        headers: HashMap<String, String>,
    ) -> GatewayResult<()>;

    /// Stats a remote object, used for post-upload verification.
    async fn stat(&self, object_key: &str) -> GatewayResult<ObjectStat>;

    /// Best-effort reachability probe for the operator health endpoint;
    /// never returns an error, only a boolean.
    async fn is_reachable(&self) -> bool;
}
