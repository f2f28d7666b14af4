//! Axum router construction and route mapping.
//!
//! The [`app`] function wires every image metadata endpoint to its handler
//! and returns a ready-to-serve [`axum::Router`].
//!
//! The API follows the compute API layout: metadata lives under
//! `/v1.1/{project_id}/images/{image_id}/metadata`.  The project segment
//! is accepted but not interpreted.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::controller::OperationKind;
use crate::errors::generate_request_id;
use crate::handlers::image_metadata;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the image metadata API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "glancemeta Image Metadata API",
        version = "0.1.0",
        description = "Key/value metadata for virtual machine images"
    ),
    paths(
        health_check,
        crate::handlers::image_metadata::list_metadata,
        crate::handlers::image_metadata::show_metadata_item,
        crate::handlers::image_metadata::create_metadata,
        crate::handlers::image_metadata::replace_metadata,
        crate::handlers::image_metadata::update_metadata_item,
        crate::handlers::image_metadata::delete_metadata_item,
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "ImageMetadata", description = "Image metadata operations"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with all image metadata routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let observability = state.config.observability.clone();

    let mut router = Router::new()
        .route(
            "/v1.1/:project_id/images/:image_id/metadata",
            get(handle_list)
                .post(handle_create)
                .put(handle_replace),
        )
        .route(
            "/v1.1/:project_id/images/:image_id/metadata/:key",
            get(handle_show).put(handle_update).delete(handle_delete),
        )
        .route("/openapi.json", get(openapi_json));

    if observability.health_check {
        router = router.route("/health", get(health_check));
    }
    if observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(TraceLayer::new_for_http())
        // metrics_middleware is outermost (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
}

// -- Common headers middleware -----------------------------------------------

/// Middleware that adds common response headers to every response:
/// - `x-compute-request-id`: `req-<uuid4>`
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `glancemeta`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // Error responses carry their own request id.
    if !headers.contains_key("x-compute-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-compute-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static("glancemeta"));

    response
}

// -- Health check / docs ------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /openapi.json`
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

// -- Metadata dispatch --------------------------------------------------------

/// `GET .../metadata` -- List
async fn handle_list(
    State(state): State<Arc<AppState>>,
    Path((_project_id, image_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    image_metadata::list_metadata(state, &image_id, &headers).await
}

/// `POST .../metadata` -- CreateBatch
async fn handle_create(
    State(state): State<Arc<AppState>>,
    Path((_project_id, image_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    match body {
        Ok(body) => image_metadata::create_metadata(state, &image_id, &headers, &body).await,
        Err(rejection) => {
            let reason = rejection.body_text();
            image_metadata::unreadable_body(
                state,
                OperationKind::CreateBatch,
                &image_id,
                &headers,
                &reason,
            )
            .await
        }
    }
}

/// `PUT .../metadata` -- ReplaceAll
async fn handle_replace(
    State(state): State<Arc<AppState>>,
    Path((_project_id, image_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    match body {
        Ok(body) => image_metadata::replace_metadata(state, &image_id, &headers, &body).await,
        Err(rejection) => {
            let reason = rejection.body_text();
            image_metadata::unreadable_body(
                state,
                OperationKind::ReplaceAll,
                &image_id,
                &headers,
                &reason,
            )
            .await
        }
    }
}

/// `GET .../metadata/:key` -- GetOne
async fn handle_show(
    State(state): State<Arc<AppState>>,
    Path((_project_id, image_id, key)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    image_metadata::show_metadata_item(state, &image_id, &key, &headers).await
}

/// `PUT .../metadata/:key` -- UpsertOne
async fn handle_update(
    State(state): State<Arc<AppState>>,
    Path((_project_id, image_id, key)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    match body {
        Ok(body) => {
            image_metadata::update_metadata_item(state, &image_id, &key, &headers, &body).await
        }
        Err(rejection) => {
            let reason = rejection.body_text();
            image_metadata::unreadable_body(
                state,
                OperationKind::UpsertOne,
                &image_id,
                &headers,
                &reason,
            )
            .await
        }
    }
}

/// `DELETE .../metadata/:key` -- DeleteOne
async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Path((_project_id, image_id, key)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    image_metadata::delete_metadata_item(state, &image_id, &key, &headers).await
}

// -- Tests --------------------------------------------------------------------
