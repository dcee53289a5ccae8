//! The Tus-like resumable-upload protocol endpoint (§4.3): CREATE, HEAD,
//! PATCH on a single configurable base path.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{info, warn};

use crate::adapters::fs_staging::is_safe_relative_path;
use crate::domain::UploadDescriptor;
use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;

const HEADER_UPLOAD_LENGTH: &str = "upload-length";
const HEADER_UPLOAD_OFFSET: &str = "upload-offset";
const HEADER_UPLOAD_METADATA: &str = "upload-metadata";

pub fn router(state: AppState) -> Router {
    let base = state.config.tus_path.clone();
    Router::new()
        .route(&base, post(create_upload))
        .route(&format!("{base}/:upload_id"), get(head_upload).patch(patch_upload))
        .with_state(state)
}

/// Parses the Tus `Upload-Metadata` header: a comma-separated list of
/// `key base64(value)` pairs. A bare key with no value is recorded as an
/// empty string.
fn parse_upload_metadata(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, ' ');
        let key = match parts.next() {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => continue,
        };
        let value = match parts.next() {
            Some(encoded) => match STANDARD.decode(encoded) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => {
                    warn!(key, "upload-metadata value is not valid base64, dropping");
                    continue;
                }
            },
            None => String::new(),
        };
        map.insert(key, value);
    }
    map
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn create_upload(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match do_create_upload(state, headers).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn do_create_upload(state: AppState, headers: HeaderMap) -> GatewayResult<Response> {
    let declared_length: u64 = header_str(&headers, HEADER_UPLOAD_LENGTH)
        .and_then(|v| v.parse().ok())
        .ok_or(GatewayError::SizeExceeded)?;

    if declared_length > state.config.max_upload_size_bytes {
        return Err(GatewayError::SizeExceeded);
    }

    let raw_metadata = header_str(&headers, HEADER_UPLOAD_METADATA)
        .map(parse_upload_metadata)
        .unwrap_or_default();

    let upload_id = state.staging.create(declared_length, raw_metadata).await?;
    let record = state.staging.head(&upload_id).await?;

    if !is_safe_relative_path(&record.metadata.relative_path) {
        state.staging.delete(&upload_id).await?;
        return Err(GatewayError::Internal(anyhow::anyhow!(
            "relativePath escapes the staging directory"
        )));
    }

    info!(upload_id = %upload_id, declared_length, "upload created");

    let location = format!("{}/{upload_id}", state.config.tus_path);
    let mut response = StatusCode::CREATED.into_response();
    response.headers_mut().insert(
        axum::http::header::LOCATION,
        location.parse().expect("location header value is always ascii"),
    );
    Ok(response)
}

async fn head_upload(State(state): State<AppState>, Path(upload_id): Path<String>) -> Response {
    match state.staging.head(&upload_id).await {
        Ok(record) => {
            let mut response = StatusCode::OK.into_response();
            let headers = response.headers_mut();
            headers.insert(
                "upload-offset",
                record.received_length.to_string().parse().unwrap(),
            );
            headers.insert(
                "upload-length",
                record.declared_length.to_string().parse().unwrap(),
            );
            response
        }
        Err(e) => e.into_response(),
    }
}

async fn patch_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match do_patch_upload(state, upload_id, headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn do_patch_upload(
    state: AppState,
    upload_id: String,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<Response> {
    let offset: u64 = header_str(&headers, HEADER_UPLOAD_OFFSET)
        .and_then(|v| v.parse().ok())
        .ok_or(GatewayError::OffsetMismatch { offset: 0, received: 0 })?;

    let new_received = state.staging.append(&upload_id, offset, &body).await?;
    let record = state.staging.head(&upload_id).await?;

    if record.is_complete() && !record.handed_off {
        state.staging.mark_handed_off(&upload_id).await?;
        let descriptor = UploadDescriptor {
            upload_id: upload_id.clone(),
            staged_path: state.staging.body_path(&upload_id),
            size: record.declared_length,
            metadata: record.metadata.clone(),
        };
        info!(upload_id = %upload_id, "upload complete, emitting finalization event");
        if state.finalize_tx.send(descriptor).await.is_err() {
            warn!(upload_id = %upload_id, "finalization channel closed, orchestrator worker is gone");
        }
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .insert("upload-offset", new_received.to_string().parse().unwrap());
    Ok(response)
}
