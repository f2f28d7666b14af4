//! Image metadata API handlers.
//!
//! Each handler decodes the request into an [`OperationRequest`], runs it
//! through the [`MetadataController`](crate::controller::MetadataController),
//! and encodes the outcome in the encoding the client asked for.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use tracing::{debug, warn};

use crate::codec::{decode_body, encode_payload, ContentFormat};
use crate::controller::{OperationKind, OperationRequest, OperationResult};
use crate::errors::MetadataError;
use crate::metrics::METADATA_OPERATIONS_TOTAL;
use crate::AppState;

/// `GET /v1.1/{project_id}/images/{image_id}/metadata` -- List all metadata.
#[utoipa::path(
    get,
    path = "/v1.1/{project_id}/images/{image_id}/metadata",
    tag = "ImageMetadata",
    operation_id = "ListImageMetadata",
    params(
        ("project_id" = String, Path, description = "Project identifier"),
        ("image_id" = String, Path, description = "Image identifier"),
    ),
    responses(
        (status = 200, description = "All metadata of the image"),
        (status = 404, description = "Image not found")
    )
)]
pub async fn list_metadata(state: Arc<AppState>, image_id: &str, headers: &HeaderMap) -> Response {
    let request = OperationRequest {
        kind: OperationKind::List,
        image_id: image_id.to_string(),
        key: None,
        body: None,
    };
    execute(&state, request, headers).await
}

/// `GET /v1.1/{project_id}/images/{image_id}/metadata/{key}` -- Show one item.
#[utoipa::path(
    get,
    path = "/v1.1/{project_id}/images/{image_id}/metadata/{key}",
    tag = "ImageMetadata",
    operation_id = "ShowImageMetadataItem",
    params(
        ("project_id" = String, Path, description = "Project identifier"),
        ("image_id" = String, Path, description = "Image identifier"),
        ("key" = String, Path, description = "Metadata key"),
    ),
    responses(
        (status = 200, description = "The metadata item"),
        (status = 404, description = "Image or key not found")
    )
)]
pub async fn show_metadata_item(
    state: Arc<AppState>,
    image_id: &str,
    key: &str,
    headers: &HeaderMap,
) -> Response {
    let request = OperationRequest {
        kind: OperationKind::GetOne,
        image_id: image_id.to_string(),
        key: Some(key.to_string()),
        body: None,
    };
    execute(&state, request, headers).await
}

/// `POST /v1.1/{project_id}/images/{image_id}/metadata` -- Merge new items.
#[utoipa::path(
    post,
    path = "/v1.1/{project_id}/images/{image_id}/metadata",
    tag = "ImageMetadata",
    operation_id = "CreateImageMetadata",
    params(
        ("project_id" = String, Path, description = "Project identifier"),
        ("image_id" = String, Path, description = "Image identifier"),
    ),
    responses(
        (status = 200, description = "Merged metadata of the image"),
        (status = 400, description = "Malformed body"),
        (status = 404, description = "Image not found"),
        (status = 413, description = "Metadata quota exceeded")
    )
)]
pub async fn create_metadata(
    state: Arc<AppState>,
    image_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    execute_with_body(&state, OperationKind::CreateBatch, image_id, None, headers, body).await
}

/// `PUT /v1.1/{project_id}/images/{image_id}/metadata` -- Replace all items.
#[utoipa::path(
    put,
    path = "/v1.1/{project_id}/images/{image_id}/metadata",
    tag = "ImageMetadata",
    operation_id = "ReplaceImageMetadata",
    params(
        ("project_id" = String, Path, description = "Project identifier"),
        ("image_id" = String, Path, description = "Image identifier"),
    ),
    responses(
        (status = 200, description = "New metadata of the image"),
        (status = 400, description = "Malformed body"),
        (status = 404, description = "Image not found"),
        (status = 413, description = "Metadata quota exceeded")
    )
)]
pub async fn replace_metadata(
    state: Arc<AppState>,
    image_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    execute_with_body(&state, OperationKind::ReplaceAll, image_id, None, headers, body).await
}

/// `PUT /v1.1/{project_id}/images/{image_id}/metadata/{key}` -- Set one item.
#[utoipa::path(
    put,
    path = "/v1.1/{project_id}/images/{image_id}/metadata/{key}",
    tag = "ImageMetadata",
    operation_id = "UpdateImageMetadataItem",
    params(
        ("project_id" = String, Path, description = "Project identifier"),
        ("image_id" = String, Path, description = "Image identifier"),
        ("key" = String, Path, description = "Metadata key"),
    ),
    responses(
        (status = 200, description = "The stored item"),
        (status = 400, description = "Malformed body or body/URI key mismatch"),
        (status = 404, description = "Image not found"),
        (status = 413, description = "Metadata quota exceeded")
    )
)]
pub async fn update_metadata_item(
    state: Arc<AppState>,
    image_id: &str,
    key: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    execute_with_body(
        &state,
        OperationKind::UpsertOne,
        image_id,
        Some(key),
        headers,
        body,
    )
    .await
}

/// `DELETE /v1.1/{project_id}/images/{image_id}/metadata/{key}` -- Delete one item.
#[utoipa::path(
    delete,
    path = "/v1.1/{project_id}/images/{image_id}/metadata/{key}",
    tag = "ImageMetadata",
    operation_id = "DeleteImageMetadataItem",
    params(
        ("project_id" = String, Path, description = "Project identifier"),
        ("image_id" = String, Path, description = "Image identifier"),
        ("key" = String, Path, description = "Metadata key"),
    ),
    responses(
        (status = 204, description = "Item deleted"),
        (status = 404, description = "Image or key not found")
    )
)]
pub async fn delete_metadata_item(
    state: Arc<AppState>,
    image_id: &str,
    key: &str,
    headers: &HeaderMap,
) -> Response {
    let request = OperationRequest {
        kind: OperationKind::DeleteOne,
        image_id: image_id.to_string(),
        key: Some(key.to_string()),
        body: None,
    };
    execute(&state, request, headers).await
}

// -- Shared plumbing ----------------------------------------------------------

/// Decode the body, then run the operation.
///
/// A body that cannot be decoded is only reported once the image is known
/// to exist.
async fn execute_with_body(
    state: &AppState,
    kind: OperationKind,
    image_id: &str,
    key: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let decoded = match decode_body(ContentFormat::from_content_type(headers), body) {
        Ok(decoded) => decoded,
        Err(err) => return reject_body(state, kind, image_id, headers, err).await,
    };

    let request = OperationRequest {
        kind,
        image_id: image_id.to_string(),
        key: key.map(str::to_string),
        body: decoded,
    };
    execute(state, request, headers).await
}

/// Answer a write whose body could not be read at all (too large, aborted
/// upload).  An unknown image is still reported as such.
pub async fn unreadable_body(
    state: Arc<AppState>,
    kind: OperationKind,
    image_id: &str,
    headers: &HeaderMap,
    reason: &str,
) -> Response {
    let err = MetadataError::malformed(format!("unreadable request body: {reason}"));
    reject_body(&state, kind, image_id, headers, err).await
}

async fn reject_body(
    state: &AppState,
    kind: OperationKind,
    image_id: &str,
    headers: &HeaderMap,
    err: MetadataError,
) -> Response {
    let err = match state.controller.ensure_image(image_id).await {
        Ok(()) => err,
        Err(not_found) => not_found,
    };
    failure(kind, image_id, err, ContentFormat::from_accept(headers))
}

async fn execute(state: &AppState, request: OperationRequest, headers: &HeaderMap) -> Response {
    let format = ContentFormat::from_accept(headers);
    let kind = request.kind;
    let image_id = request.image_id.clone();

    match state.controller.dispatch(request).await {
        Ok(result) => {
            counter!(METADATA_OPERATIONS_TOTAL, "operation" => kind.as_str(), "outcome" => "ok")
                .increment(1);
            debug!("{} on image {} succeeded", kind.as_str(), image_id);
            success(result, format)
        }
        Err(err) => failure(kind, &image_id, err, format),
    }
}

fn success(result: OperationResult, format: ContentFormat) -> Response {
    if result.status == StatusCode::NO_CONTENT {
        return StatusCode::NO_CONTENT.into_response();
    }
    let body = encode_payload(format, &result.payload);
    (result.status, [("content-type", format.mime())], body).into_response()
}

fn failure(
    kind: OperationKind,
    image_id: &str,
    err: MetadataError,
    format: ContentFormat,
) -> Response {
    counter!(METADATA_OPERATIONS_TOTAL, "operation" => kind.as_str(), "outcome" => err.kind())
        .increment(1);
    if matches!(err, MetadataError::Internal(_)) {
        warn!("{} on image {} failed: {}", kind.as_str(), image_id, err.kind());
    } else {
        debug!("{} on image {} rejected: {}", kind.as_str(), image_id, err);
    }
    err.into_response_as(format)
}
