//! In-memory image metadata store.
//!
//! Stores all metadata in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock<HashMap>` for thread-safe access.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{ImageMetadataStore, KeyAbsent, MetadataSet};

#[derive(Debug, Default)]
pub struct MemoryImageStore {
    images: RwLock<HashMap<String, MetadataSet>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image with its initial metadata. Idempotent: an image
    /// that is already known keeps its current metadata.
    pub fn seed_image(&self, image_id: &str, metadata: MetadataSet) -> anyhow::Result<()> {
        let mut images = self.images.write().expect("rwlock poisoned");
        images.entry(image_id.to_string()).or_insert(metadata);
        Ok(())
    }
}

fn missing_image(image_id: &str) -> anyhow::Error {
    anyhow::anyhow!("Image does not exist: {image_id}")
}

impl ImageMetadataStore for MemoryImageStore {
    fn image_exists(
        &self,
        image_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let image_id = image_id.to_string();
        Box::pin(async move {
            let images = self.images.read().expect("rwlock poisoned");
            Ok(images.contains_key(&image_id))
        })
    }

    fn get_metadata(
        &self,
        image_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetadataSet>> + Send + '_>> {
        let image_id = image_id.to_string();
        Box::pin(async move {
            let images = self.images.read().expect("rwlock poisoned");
            images
                .get(&image_id)
                .cloned()
                .ok_or_else(|| missing_image(&image_id))
        })
    }

    fn replace_metadata(
        &self,
        image_id: &str,
        metadata: MetadataSet,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let image_id = image_id.to_string();
        Box::pin(async move {
            let mut images = self.images.write().expect("rwlock poisoned");
            let current = images
                .get_mut(&image_id)
                .ok_or_else(|| missing_image(&image_id))?;
            *current = metadata;
            Ok(())
        })
    }

    fn merge_metadata(
        &self,
        image_id: &str,
        metadata: MetadataSet,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetadataSet>> + Send + '_>> {
        let image_id = image_id.to_string();
        Box::pin(async move {
            let mut images = self.images.write().expect("rwlock poisoned");
            let current = images
                .get_mut(&image_id)
                .ok_or_else(|| missing_image(&image_id))?;
            current.extend(metadata);
            Ok(current.clone())
        })
    }

    fn set_item(
        &self,
        image_id: &str,
        key: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let image_id = image_id.to_string();
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let mut images = self.images.write().expect("rwlock poisoned");
            let current = images
                .get_mut(&image_id)
                .ok_or_else(|| missing_image(&image_id))?;
            current.insert(key, value);
            Ok(())
        })
    }

    fn delete_item(
        &self,
        image_id: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let image_id = image_id.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let mut images = self.images.write().expect("rwlock poisoned");
            let current = images
                .get_mut(&image_id)
                .ok_or_else(|| missing_image(&image_id))?;
            match current.remove(&key) {
                Some(_) => Ok(()),
                None => Err(KeyAbsent { image_id, key }.into()),
            }
        })
    }
}
