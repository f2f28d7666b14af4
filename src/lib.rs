//! glancemeta library -- image metadata service.
//!
//! This crate provides the components for serving free-form key/value
//! metadata attached to virtual machine images: the metadata controller
//! (validation, merge and quota logic), pluggable metadata stores, wire
//! codecs, and the HTTP surface.

use std::sync::Arc;

pub mod codec;
pub mod config;
pub mod controller;
pub mod errors;
pub mod handlers;
pub mod metadata;
pub mod metrics;
pub mod server;
pub mod xml;

use tracing::info;

use crate::config::{Config, QuotaHandle};
use crate::controller::MetadataController;
use crate::metadata::memory::MemoryImageStore;
use crate::metadata::sqlite::SqliteImageStore;
use crate::metadata::store::ImageMetadataStore;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration, as loaded at startup.
    pub config: Config,
    /// Live quota; reloads update it in place.
    pub quota: QuotaHandle,
    /// Metadata controller over the configured store.
    pub controller: MetadataController,
}

impl AppState {
    /// Open the configured metadata store, register the seeded images, and
    /// wire the controller to a fresh quota handle.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = open_store(&config)?;
        let quota = QuotaHandle::from(&config.quota);
        let controller = MetadataController::new(store, quota.clone());
        Ok(Self {
            config,
            quota,
            controller,
        })
    }
}

/// Open the metadata store named by `metadata.engine` and seed it with the
/// configured images.  Seeding is idempotent, so every startup can run it.
pub fn open_store(config: &Config) -> anyhow::Result<Arc<dyn ImageMetadataStore>> {
    match config.metadata.engine.as_str() {
        "memory" => {
            let store = MemoryImageStore::new();
            for image in &config.images {
                store.seed_image(&image.id, image.metadata.clone())?;
            }
            info!("Memory metadata store initialized");
            Ok(Arc::new(store))
        }
        "sqlite" => {
            let path = &config.metadata.sqlite.path;
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteImageStore::new(path)?;
            for image in &config.images {
                store.seed_image(&image.id, image.metadata.clone())?;
            }
            info!("SQLite metadata store initialized at {}", path);
            Ok(Arc::new(store))
        }
        other => Err(anyhow::anyhow!("unknown metadata engine: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageSeed;
    use std::collections::HashMap;

    fn seeded_config(engine: &str) -> Config {
        let mut config = Config::default();
        config.metadata.engine = engine.to_string();
        config.images = vec![ImageSeed {
            id: "123".to_string(),
            metadata: HashMap::from([("key1".to_string(), "value1".to_string())]),
        }];
        config
    }

    #[tokio::test]
    async fn test_open_memory_store_seeds_images() {
        let store = open_store(&seeded_config("memory")).unwrap();
        assert!(store.image_exists("123").await.unwrap());
        assert_eq!(store.get_metadata("123").await.unwrap()["key1"], "value1");
    }

    #[tokio::test]
    async fn test_open_sqlite_store_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = seeded_config("sqlite");
        config.metadata.sqlite.path = dir
            .path()
            .join("nested/metadata.db")
            .to_string_lossy()
            .into_owned();

        let store = open_store(&config).unwrap();
        assert!(store.image_exists("123").await.unwrap());
        assert!(!store.image_exists("100").await.unwrap());
    }

    #[test]
    fn test_unknown_engine() {
        assert!(open_store(&seeded_config("cassandra")).is_err());
    }

    #[tokio::test]
    async fn test_state_quota_is_shared_with_controller() {
        let mut config = seeded_config("memory");
        config.quota.max_metadata_items = 1;
        let state = AppState::from_config(config).unwrap();

        let body = serde_json::json!({"meta": {"key2": "v"}});
        assert!(state.controller.upsert_one("123", "key2", &body).await.is_err());
        state.quota.set_max_metadata_items(2);
        assert!(state.controller.upsert_one("123", "key2", &body).await.is_ok());
    }
}
