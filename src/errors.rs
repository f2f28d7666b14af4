//! Image metadata error types.
//!
//! Every variant maps to a compute API fault name and an HTTP status.  The
//! enum implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(MetadataError::ImageNotFound { .. })`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::codec::ContentFormat;

/// Generate a request ID of the form `req-<uuid4>`.
pub fn generate_request_id() -> String {
    format!("req-{}", uuid::Uuid::new_v4())
}

/// Failures produced by the metadata controller.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The target image is not known to the store.
    #[error("Image not found: {image_id}")]
    ImageNotFound { image_id: String },

    /// The target metadata key is not set on the image.
    #[error("Metadata item was not found: {key}")]
    KeyNotFound { key: String },

    /// The request body is missing, undecodable, or has the wrong shape.
    #[error("Malformed request body: {message}")]
    MalformedBody { message: String },

    /// The key in the request URI differs from the key in the body.
    #[error("Request body and URI mismatch: URI key '{uri_key}', body key '{body_key}'")]
    KeyMismatch { uri_key: String, body_key: String },

    /// The write would leave the image with more entries than allowed.
    #[error("Quota exceeded for metadata items: limit is {limit}, request would leave {requested}")]
    QuotaExceeded { limit: usize, requested: usize },

    /// Catch-all for store and infrastructure failures.
    #[error("The server has either erred or is incapable of performing the requested operation.")]
    Internal(#[from] anyhow::Error),
}

impl MetadataError {
    /// Shorthand for a [`MetadataError::MalformedBody`] with the given detail.
    pub fn malformed(message: impl Into<String>) -> Self {
        MetadataError::MalformedBody {
            message: message.into(),
        }
    }

    /// Fault name used as the top-level key of the error body.
    pub fn code(&self) -> &'static str {
        match self {
            MetadataError::ImageNotFound { .. } => "itemNotFound",
            MetadataError::KeyNotFound { .. } => "itemNotFound",
            MetadataError::MalformedBody { .. } => "badRequest",
            MetadataError::KeyMismatch { .. } => "badRequest",
            MetadataError::QuotaExceeded { .. } => "overLimit",
            MetadataError::Internal(_) => "computeFault",
        }
    }

    /// Short label for the error kind, used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            MetadataError::ImageNotFound { .. } => "ImageNotFound",
            MetadataError::KeyNotFound { .. } => "KeyNotFound",
            MetadataError::MalformedBody { .. } => "MalformedBody",
            MetadataError::KeyMismatch { .. } => "KeyMismatch",
            MetadataError::QuotaExceeded { .. } => "QuotaExceeded",
            MetadataError::Internal(_) => "Internal",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            MetadataError::ImageNotFound { .. } => StatusCode::NOT_FOUND,
            MetadataError::KeyNotFound { .. } => StatusCode::NOT_FOUND,
            MetadataError::MalformedBody { .. } => StatusCode::BAD_REQUEST,
            MetadataError::KeyMismatch { .. } => StatusCode::BAD_REQUEST,
            MetadataError::QuotaExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            MetadataError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render the fault body in the negotiated encoding.
    pub fn into_response_as(self, format: ContentFormat) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        if let MetadataError::Internal(ref err) = self {
            tracing::error!("internal error: {err:#}");
        }

        let body = match format {
            ContentFormat::Json => serde_json::json!({
                self.code(): {
                    "code": status.as_u16(),
                    "message": message,
                }
            })
            .to_string(),
            ContentFormat::Xml => crate::xml::render_fault(self.code(), status.as_u16(), &message),
        };

        (
            status,
            [
                ("content-type", format.mime().to_string()),
                ("x-compute-request-id", generate_request_id()),
            ],
            body,
        )
            .into_response()
    }
}

impl IntoResponse for MetadataError {
    fn into_response(self) -> Response {
        self.into_response_as(ContentFormat::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                MetadataError::ImageNotFound {
                    image_id: "100".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                MetadataError::KeyNotFound { key: "k".into() },
                StatusCode::NOT_FOUND,
            ),
            (MetadataError::malformed("x"), StatusCode::BAD_REQUEST),
            (
                MetadataError::KeyMismatch {
                    uri_key: "bad".into(),
                    body_key: "key1".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                MetadataError::QuotaExceeded {
                    limit: 1,
                    requested: 2,
                },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                MetadataError::Internal(anyhow::anyhow!("disk on fire")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{}", err.kind());
        }
    }

    #[test]
    fn test_not_found_kinds_share_fault_name() {
        let image = MetadataError::ImageNotFound {
            image_id: "100".into(),
        };
        let key = MetadataError::KeyNotFound { key: "k".into() };
        assert_eq!(image.code(), key.code());
        assert_ne!(image.kind(), key.kind());
    }

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert!(id.starts_with("req-"));
        assert_eq!(id.len(), 4 + 36);
    }

    #[tokio::test]
    async fn test_json_fault_body() {
        let response = MetadataError::QuotaExceeded {
            limit: 1,
            requested: 2,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(response.headers().contains_key("x-compute-request-id"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["overLimit"]["code"], 413);
        assert!(value["overLimit"]["message"]
            .as_str()
            .unwrap()
            .contains("limit is 1"));
    }
}
