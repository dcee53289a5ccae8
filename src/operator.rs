//! The operator-facing HTTP surface (§4.6, §6): health probes, staged-file
//! and failed-upload listings, single-upload retry, and the bulk
//! "process pending" sweep. Kept separate from the Tus-like protocol
//! endpoint in `protocol::tus` since it answers to operators, not clients.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::info;

use crate::domain::{FailedUpload, UploadDescriptor, UploadMetadata};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/minio", get(health_object_store))
        .route("/debug/uploads", get(debug_uploads))
        .route("/debug/failed-uploads", get(debug_failed_uploads))
        .route("/debug/retry-upload/:upload_id", post(retry_upload))
        .route("/debug/process-pending", post(process_pending))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn health_object_store(State(state): State<AppState>) -> Response {
    if state.object_store.is_reachable().await {
        (StatusCode::OK, Json(json!({ "status": "connected" }))).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "disconnected" }))).into_response()
    }
}

async fn debug_uploads(State(state): State<AppState>) -> Response {
    match state.staging.list_pending().await {
        Ok(files) => {
            let count = files.len();
            let files: Vec<_> = files
                .into_iter()
                .map(|f| json!({ "name": f.name, "path": f.path.to_string_lossy(), "size": f.size }))
                .collect();
            Json(json!({ "files": files, "count": count })).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

fn failed_upload_json(failed: &FailedUpload) -> serde_json::Value {
    json!({
        "uploadId": failed.id,
        "stagedPath": failed.staged_path.to_string_lossy(),
        "filename": failed.metadata.filename,
        "lastError": failed.last_error,
        "lastAttemptAt": failed.last_attempt_at.to_rfc3339(),
    })
}

async fn debug_failed_uploads(State(state): State<AppState>) -> Json<serde_json::Value> {
    let failed: Vec<_> = state.registry.list().iter().map(failed_upload_json).collect();
    Json(json!({ "failedUploads": failed, "count": failed.len() }))
}

/// Re-submits a previously failed upload into the Single-File finalization
/// path (§4.4), using the metadata and staged path recorded at failure
/// time. Bypasses multipart routing via `finalize_direct` so an
/// already-assembled artifact isn't mistaken for a fresh part (§4.6).
async fn retry_upload(State(state): State<AppState>, Path(upload_id): Path<String>) -> Response {
    let Some(failed) = state.registry.get(&upload_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("no failed upload for {upload_id}") })),
        )
            .into_response();
    };

    let descriptor = UploadDescriptor {
        upload_id: upload_id.clone(),
        staged_path: failed.staged_path.clone(),
        size: 0,
        metadata: failed.metadata.clone(),
    };

    match state.orchestrator.finalize_direct(descriptor).await {
        Ok(()) => {
            info!(upload_id = %upload_id, "operator retry succeeded");
            Json(json!({ "success": true, "message": format!("retried {upload_id}") })).into_response()
        }
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })).into_response(),
    }
}

/// Scans the Staging Store for bodies not owned by any in-progress
/// multipart assembly and not marked as assembled artifacts, reconstructs
/// a synthetic `UploadDescriptor` for each (from its sidecar, or defaults
/// if none exists), and invokes the Single-File path directly (§4.6).
async fn process_pending(State(state): State<AppState>) -> Response {
    let pending = match state.staging.list_pending().await {
        Ok(files) => files,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    };

    let mut processed = 0u32;
    let mut failed = 0u32;
    let mut results = Vec::with_capacity(pending.len());

    for file in pending {
        if state.assembler.is_active_part(&file.name) {
            continue;
        }

        let metadata = match state.staging.head(&file.name).await {
            Ok(record) => record.metadata,
            Err(_) => UploadMetadata::from_raw(&file.name, HashMap::new()),
        };
        let filename = metadata.filename.clone();

        let descriptor = UploadDescriptor {
            upload_id: file.name.clone(),
            staged_path: file.path.clone(),
            size: file.size,
            metadata,
        };

        match state.orchestrator.finalize_direct(descriptor).await {
            Ok(()) => {
                processed += 1;
                results.push(json!({ "uploadId": file.name, "status": "success", "filename": filename }));
            }
            Err(e) => {
                failed += 1;
                results.push(json!({ "uploadId": file.name, "status": "failed", "error": e.to_string() }));
            }
        }
    }

    info!(processed, failed, "process-pending sweep complete");
    Json(json!({
        "success": true,
        "processed": processed,
        "failed": failed,
        "total": processed + failed,
        "results": results,
    }))
    .into_response()
}
