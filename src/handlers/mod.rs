//! HTTP handlers, one module per resource.

pub mod image_metadata;
