//! Wire encodings: content negotiation, body decoding, payload encoding.
//!
//! JSON is the default encoding; XML is selected by `Content-Type` for
//! request bodies and by `Accept` for responses.

use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::HeaderMap;
use serde_json::Value;

use crate::controller::Payload;
use crate::errors::MetadataError;

/// A supported wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Json,
    Xml,
}

impl ContentFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ContentFormat::Json => "application/json",
            ContentFormat::Xml => "application/xml",
        }
    }

    /// Encoding of the request body, from `Content-Type`.
    pub fn from_content_type(headers: &HeaderMap) -> Self {
        headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(Self::from_mime)
            .unwrap_or(ContentFormat::Json)
    }

    /// Encoding the client wants back, from `Accept`.
    ///
    /// Only an explicit XML media type selects XML; wildcards and anything
    /// unrecognised fall back to JSON.
    pub fn from_accept(headers: &HeaderMap) -> Self {
        let Some(accept) = headers.get(ACCEPT).and_then(|v| v.to_str().ok()) else {
            return ContentFormat::Json;
        };
        accept
            .split(',')
            .map(Self::from_mime)
            .find(|format| *format == ContentFormat::Xml)
            .unwrap_or(ContentFormat::Json)
    }

    fn from_mime(value: &str) -> Self {
        let mime = value
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "application/xml" | "text/xml" => ContentFormat::Xml,
            _ => ContentFormat::Json,
        }
    }
}

/// Decode a request body into its structural form.
///
/// An empty body decodes to `None`.
pub fn decode_body(format: ContentFormat, body: &[u8]) -> Result<Option<Value>, MetadataError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value = match format {
        ContentFormat::Json => serde_json::from_slice(body)
            .map_err(|err| MetadataError::malformed(format!("invalid JSON: {err}")))?,
        ContentFormat::Xml => crate::xml::parse_body(body)?,
    };
    Ok(Some(value))
}

/// Encode a success payload. [`Payload::Empty`] encodes to an empty string.
pub fn encode_payload(format: ContentFormat, payload: &Payload) -> String {
    match format {
        ContentFormat::Json => payload
            .to_value()
            .map(|value| value.to_string())
            .unwrap_or_default(),
        ContentFormat::Xml => match payload {
            Payload::Metadata(metadata) => crate::xml::render_metadata(metadata),
            Payload::Meta { key, value } => crate::xml::render_meta(key, value),
            Payload::Empty => String::new(),
        },
    }
}
