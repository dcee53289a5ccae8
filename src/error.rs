//! Typed error taxonomy for the gateway.
//!
//! Mirrors the error table: one variant per failure kind that the protocol
//! or the finalization path needs to treat distinctly. Internal plumbing
//! (sidecar parsing, directory creation) uses `anyhow` at the call site and
//! is wrapped into `GatewayError::Io`/`Internal` rather than growing the
//! taxonomy for cases callers never need to match on.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("offset {offset} does not match current received length {received}")]
    OffsetMismatch { offset: u64, received: u64 },

    #[error("upload would exceed the configured maximum size")]
    SizeExceeded,

    #[error("finalization found an empty staged body")]
    EmptyBody,

    #[error("part metadata conflict for multipartId {multipart_id}: {reason}")]
    PartMetadataConflict { multipart_id: String, reason: String },

    #[error("part {part_index} referenced by assembly {multipart_id} is missing on disk")]
    PartMissingOnAssemble { multipart_id: String, part_index: i64 },

    #[error("transient object-store error: {0}")]
    RemoteTransient(String),

    #[error("permanent object-store error: {0}")]
    RemotePermanent(String),

    #[error("assembly {multipart_id} exceeded the stale threshold and was reaped")]
    StaleAssembly { multipart_id: String },

    #[error("upload {0} not found")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// A short machine-readable tag matching the taxonomy names used in the
    /// spec's error table, for logging and for JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OffsetMismatch { .. } => "OFFSET_MISMATCH",
            Self::SizeExceeded => "SIZE_EXCEEDED",
            Self::EmptyBody => "EMPTY_BODY",
            Self::PartMetadataConflict { .. } => "PART_METADATA_CONFLICT",
            Self::PartMissingOnAssemble { .. } => "PART_MISSING_ON_ASSEMBLE",
            Self::RemoteTransient(_) => "REMOTE_TRANSIENT",
            Self::RemotePermanent(_) => "REMOTE_PERMANENT",
            Self::StaleAssembly { .. } => "STALE_ASSEMBLY",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a failure of this kind is worth retrying against the object
    /// store (transient network/5xx) as opposed to surfacing immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteTransient(_))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::OffsetMismatch { .. } => StatusCode::CONFLICT,
            Self::SizeExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::EmptyBody
            | Self::PartMetadataConflict { .. }
            | Self::PartMissingOnAssemble { .. }
            | Self::RemoteTransient(_)
            | Self::RemotePermanent(_)
            | Self::StaleAssembly { .. }
            | Self::Io(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
