//! Abstract image metadata store trait.
//!
//! Any metadata backend must implement [`ImageMetadataStore`].  The trait
//! uses `async_trait`-style methods (manual desugaring with pinned
//! futures) so it can be used with both SQLite and in-memory stores.
//!
//! Stores are plumbing only: they never enforce quotas or validate keys.
//! That is the controller's job.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Free-form key/value metadata attached to one image.
pub type MetadataSet = HashMap<String, String>;

/// Returned (inside `anyhow::Error`) by [`ImageMetadataStore::delete_item`]
/// when the key is not set on the image.
#[derive(Debug, thiserror::Error)]
#[error("Metadata key {key} not set on image {image_id}")]
pub struct KeyAbsent {
    pub image_id: String,
    pub key: String,
}

/// Async image metadata store contract.
///
/// Every method except [`ImageMetadataStore::image_exists`] expects the image
/// to exist and returns an error otherwise.
pub trait ImageMetadataStore: Send + Sync + 'static {
    /// Check whether an image is known to the store.
    fn image_exists(
        &self,
        image_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Get the full metadata set of an image.
    fn get_metadata(
        &self,
        image_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetadataSet>> + Send + '_>>;

    /// Discard the image's metadata and store `metadata` in its place.
    fn replace_metadata(
        &self,
        image_id: &str,
        metadata: MetadataSet,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Insert or overwrite every entry of `metadata`, keeping other keys.
    /// Returns the resulting full set.
    fn merge_metadata(
        &self,
        image_id: &str,
        metadata: MetadataSet,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetadataSet>> + Send + '_>>;

    /// Insert or overwrite a single entry.
    fn set_item(
        &self,
        image_id: &str,
        key: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Remove a single entry. Fails with [`KeyAbsent`] if the key is absent.
    fn delete_item(
        &self,
        image_id: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}
