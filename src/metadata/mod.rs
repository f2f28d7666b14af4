//! Image metadata storage layer.
//!
//! The [`store::ImageMetadataStore`] trait defines the interface;
//! [`sqlite::SqliteImageStore`] is the default implementation and
//! [`memory::MemoryImageStore`] backs tests and ephemeral deployments.

pub mod memory;
pub mod sqlite;
pub mod store;
