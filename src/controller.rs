//! Image metadata controller.
//!
//! Validation, merge, and quota logic for the metadata of a single image.
//! The controller is stateless: every call resolves the image against the
//! store, validates the request, checks the quota against the prospective
//! result, and only then writes.  Any failure leaves the store untouched.
//!
//! Request bodies arrive already decoded into a [`serde_json::Value`]; the
//! controller does not know or care which wire encoding produced it.

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{Map, Value};

use crate::config::QuotaHandle;
use crate::errors::MetadataError;
use crate::metadata::store::{ImageMetadataStore, KeyAbsent, MetadataSet};

// -- Request / result types ---------------------------------------------------

/// The operations the controller exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    List,
    GetOne,
    CreateBatch,
    ReplaceAll,
    UpsertOne,
    DeleteOne,
}

impl OperationKind {
    /// Stable name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::List => "list",
            OperationKind::GetOne => "get_one",
            OperationKind::CreateBatch => "create_batch",
            OperationKind::ReplaceAll => "replace_all",
            OperationKind::UpsertOne => "upsert_one",
            OperationKind::DeleteOne => "delete_one",
        }
    }

    fn needs_key(&self) -> bool {
        matches!(
            self,
            OperationKind::GetOne | OperationKind::UpsertOne | OperationKind::DeleteOne
        )
    }
}

/// One decoded call against the controller.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub image_id: String,
    /// Metadata key taken from the request target, for single-item operations.
    pub key: Option<String>,
    /// Decoded request body, for write operations.
    pub body: Option<Value>,
}

/// Success payload of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// `{"metadata": {...}}`
    Metadata(MetadataSet),
    /// `{"meta": {key: value}}`
    Meta { key: String, value: String },
    /// No body.
    Empty,
}

impl Payload {
    /// Structural (JSON) form of the payload. `None` for [`Payload::Empty`].
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Payload::Metadata(metadata) => Some(serde_json::json!({ "metadata": metadata })),
            Payload::Meta { key, value } => {
                let mut entry = Map::new();
                entry.insert(key.clone(), Value::String(value.clone()));
                Some(serde_json::json!({ "meta": entry }))
            }
            Payload::Empty => None,
        }
    }
}

/// Successful outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub payload: Payload,
    pub status: StatusCode,
}

impl OperationResult {
    fn ok(payload: Payload) -> Self {
        Self {
            payload,
            status: StatusCode::OK,
        }
    }

    fn no_content() -> Self {
        Self {
            payload: Payload::Empty,
            status: StatusCode::NO_CONTENT,
        }
    }
}

// -- Entry validation ---------------------------------------------------------

/// A single metadata entry after normalization, checked with `garde`.
#[derive(Debug, garde::Validate)]
struct MetadataItem {
    /// Keys are 1-255 bytes.
    #[garde(length(min = 1, max = 255))]
    key: String,
    /// Values are at most 255 bytes.
    #[garde(length(max = 255))]
    value: String,
}

/// Coerce a decoded body value into its stored string form.
///
/// Strings pass through unchanged; numbers and booleans use their canonical
/// text form.  Anything else cannot be stored as a metadata value.
pub fn normalize_value(key: &str, value: &Value) -> Result<String, MetadataError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(MetadataError::malformed(format!(
            "value for '{key}' must not be null"
        ))),
        Value::Array(_) | Value::Object(_) => Err(MetadataError::malformed(format!(
            "value for '{key}' must be a scalar"
        ))),
    }
}

fn validate_entry(key: &str, value: String) -> Result<(String, String), MetadataError> {
    use garde::Validate;

    let item = MetadataItem {
        key: key.to_string(),
        value,
    };
    item.validate()
        .map_err(|report| MetadataError::malformed(format!("invalid metadata item: {report}")))?;
    Ok((item.key, item.value))
}

/// Normalize and validate every entry of a decoded mapping.
fn normalize_entries(entries: &Map<String, Value>) -> Result<MetadataSet, MetadataError> {
    entries
        .iter()
        .map(|(key, value)| validate_entry(key, normalize_value(key, value)?))
        .collect()
}

/// Pull the mapping under `field` out of a body shaped `{ field: { ... } }`.
fn extract_section<'a>(body: &'a Value, field: &str) -> Result<&'a Map<String, Value>, MetadataError> {
    let document = body
        .as_object()
        .ok_or_else(|| MetadataError::malformed("request body must be a mapping"))?;
    if document.len() != 1 {
        return Err(MetadataError::malformed(format!(
            "request body must contain only '{field}'"
        )));
    }
    match document.get(field) {
        Some(Value::Object(section)) => Ok(section),
        Some(_) => Err(MetadataError::malformed(format!(
            "'{field}' must be a mapping"
        ))),
        None => Err(MetadataError::malformed(format!(
            "request body is missing '{field}'"
        ))),
    }
}

// -- Controller ---------------------------------------------------------------

/// Stateless controller for image metadata.
#[derive(Clone)]
pub struct MetadataController {
    store: Arc<dyn ImageMetadataStore>,
    quota: QuotaHandle,
}

impl MetadataController {
    pub fn new(store: Arc<dyn ImageMetadataStore>, quota: QuotaHandle) -> Self {
        Self { store, quota }
    }

    /// Route a decoded request to the matching operation.
    pub async fn dispatch(
        &self,
        request: OperationRequest,
    ) -> Result<OperationResult, MetadataError> {
        let OperationRequest {
            kind,
            image_id,
            key,
            body,
        } = request;

        let key = match (kind.needs_key(), key) {
            (true, Some(key)) => key,
            (true, None) => {
                self.ensure_image(&image_id).await?;
                return Err(MetadataError::malformed(format!(
                    "{} requires a metadata key",
                    kind.as_str()
                )));
            }
            (false, _) => String::new(),
        };
        let body = body.unwrap_or(Value::Null);

        match kind {
            OperationKind::List => self.list(&image_id).await,
            OperationKind::GetOne => self.get_one(&image_id, &key).await,
            OperationKind::CreateBatch => self.create_batch(&image_id, &body).await,
            OperationKind::ReplaceAll => self.replace_all(&image_id, &body).await,
            OperationKind::UpsertOne => self.upsert_one(&image_id, &key, &body).await,
            OperationKind::DeleteOne => self.delete_one(&image_id, &key).await,
        }
    }

    /// Return every metadata entry of the image.
    pub async fn list(&self, image_id: &str) -> Result<OperationResult, MetadataError> {
        self.ensure_image(image_id).await?;
        let metadata = self.store.get_metadata(image_id).await?;
        Ok(OperationResult::ok(Payload::Metadata(metadata)))
    }

    /// Return a single metadata entry.
    pub async fn get_one(&self, image_id: &str, key: &str) -> Result<OperationResult, MetadataError> {
        self.ensure_image(image_id).await?;
        let mut metadata = self.store.get_metadata(image_id).await?;
        let value = metadata
            .remove(key)
            .ok_or_else(|| MetadataError::KeyNotFound {
                key: key.to_string(),
            })?;
        Ok(OperationResult::ok(Payload::Meta {
            key: key.to_string(),
            value,
        }))
    }

    /// Merge a batch of entries into the image's metadata.
    ///
    /// Body: `{"metadata": {...}}`.  Keys not in the batch are preserved.
    pub async fn create_batch(
        &self,
        image_id: &str,
        body: &Value,
    ) -> Result<OperationResult, MetadataError> {
        self.ensure_image(image_id).await?;
        let additions = normalize_entries(extract_section(body, "metadata")?)?;

        let existing = self.store.get_metadata(image_id).await?;
        let new_keys = additions
            .keys()
            .filter(|key| !existing.contains_key(*key))
            .count();
        self.check_quota(existing.len() + new_keys)?;

        let merged = self.store.merge_metadata(image_id, additions).await?;
        Ok(OperationResult::ok(Payload::Metadata(merged)))
    }

    /// Replace the image's metadata wholesale.
    ///
    /// Body: `{"metadata": {...}}`.
    pub async fn replace_all(
        &self,
        image_id: &str,
        body: &Value,
    ) -> Result<OperationResult, MetadataError> {
        self.ensure_image(image_id).await?;
        let metadata = normalize_entries(extract_section(body, "metadata")?)?;
        self.check_quota(metadata.len())?;

        self.store
            .replace_metadata(image_id, metadata.clone())
            .await?;
        Ok(OperationResult::ok(Payload::Metadata(metadata)))
    }

    /// Insert or overwrite the entry named by `key`.
    ///
    /// Body: `{"meta": {key: value}}` with exactly one entry whose key
    /// matches `key`.
    pub async fn upsert_one(
        &self,
        image_id: &str,
        key: &str,
        body: &Value,
    ) -> Result<OperationResult, MetadataError> {
        self.ensure_image(image_id).await?;

        let section = extract_section(body, "meta")?;
        if section.len() != 1 {
            return Err(MetadataError::malformed(format!(
                "'meta' must contain exactly one entry, got {}",
                section.len()
            )));
        }
        let (body_key, raw_value) = section
            .iter()
            .next()
            .ok_or_else(|| MetadataError::malformed("'meta' is empty"))?;
        if body_key != key {
            return Err(MetadataError::KeyMismatch {
                uri_key: key.to_string(),
                body_key: body_key.clone(),
            });
        }
        let (key, value) = validate_entry(key, normalize_value(key, raw_value)?)?;

        // Overwriting an existing key cannot grow the set.
        let existing = self.store.get_metadata(image_id).await?;
        if !existing.contains_key(&key) {
            self.check_quota(existing.len() + 1)?;
        }

        self.store.set_item(image_id, &key, &value).await?;
        Ok(OperationResult::ok(Payload::Meta { key, value }))
    }

    /// Remove the entry named by `key`.
    pub async fn delete_one(&self, image_id: &str, key: &str) -> Result<OperationResult, MetadataError> {
        self.ensure_image(image_id).await?;
        match self.store.delete_item(image_id, key).await {
            Ok(()) => Ok(OperationResult::no_content()),
            // The key may also vanish to a concurrent delete.
            Err(err) if err.is::<KeyAbsent>() => Err(MetadataError::KeyNotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Fail with [`MetadataError::ImageNotFound`] unless the image exists.
    ///
    /// Every operation starts with this check; transports call it directly
    /// when a request fails before reaching an operation, so an unknown
    /// image still wins over a bad body.
    pub async fn ensure_image(&self, image_id: &str) -> Result<(), MetadataError> {
        if !self.store.image_exists(image_id).await? {
            return Err(MetadataError::ImageNotFound {
                image_id: image_id.to_string(),
            });
        }
        Ok(())
    }

    /// Fail if an image would end up with `requested` entries.
    fn check_quota(&self, requested: usize) -> Result<(), MetadataError> {
        let limit = self.quota.max_metadata_items();
        if requested > limit {
            return Err(MetadataError::QuotaExceeded { limit, requested });
        }
        Ok(())
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryImageStore;
    use serde_json::json;

    fn metadata(pairs: &[(&str, &str)]) -> MetadataSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Controller over a memory store holding image "123" = {key1: value1}.
    fn setup(max_items: usize) -> (MetadataController, Arc<MemoryImageStore>, QuotaHandle) {
        let store = Arc::new(MemoryImageStore::new());
        store
            .seed_image("123", metadata(&[("key1", "value1")]))
            .unwrap();
        let quota = QuotaHandle::new(max_items);
        let controller = MetadataController::new(store.clone(), quota.clone());
        (controller, store, quota)
    }

    async fn stored(store: &MemoryImageStore) -> MetadataSet {
        store.get_metadata("123").await.unwrap()
    }

    // ── list / get_one ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_list() {
        let (controller, _, _) = setup(128);
        let result = controller.list("123").await.unwrap();
        assert_eq!(result.status, StatusCode::OK);
        assert_eq!(
            result.payload.to_value().unwrap(),
            json!({"metadata": {"key1": "value1"}})
        );
    }

    #[tokio::test]
    async fn test_list_empty_image() {
        let (controller, store, _) = setup(128);
        store.seed_image("empty", MetadataSet::new()).unwrap();
        let result = controller.list("empty").await.unwrap();
        assert_eq!(result.payload.to_value().unwrap(), json!({"metadata": {}}));
    }

    #[tokio::test]
    async fn test_get_one() {
        let (controller, _, _) = setup(128);
        let result = controller.get_one("123", "key1").await.unwrap();
        assert_eq!(
            result.payload,
            Payload::Meta {
                key: "key1".into(),
                value: "value1".into()
            }
        );
        assert_eq!(
            result.payload.to_value().unwrap(),
            json!({"meta": {"key1": "value1"}})
        );
    }

    #[tokio::test]
    async fn test_get_one_key_not_found() {
        let (controller, _, _) = setup(128);
        let err = controller.get_one("123", "key9").await.unwrap_err();
        assert!(matches!(err, MetadataError::KeyNotFound { .. }));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    // ── create_batch ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_batch_is_union() {
        let (controller, store, _) = setup(128);
        let result = controller
            .create_batch("123", &json!({"metadata": {"key7": "value7"}}))
            .await
            .unwrap();
        assert_eq!(result.status, StatusCode::OK);
        assert_eq!(
            result.payload,
            Payload::Metadata(metadata(&[("key1", "value1"), ("key7", "value7")]))
        );
        assert_eq!(
            stored(&store).await,
            metadata(&[("key1", "value1"), ("key7", "value7")])
        );
    }

    #[tokio::test]
    async fn test_create_batch_quota_boundary() {
        // One existing entry; a batch of N new keys brings the total to N + 1.
        let n = 5;
        let (controller, store, _) = setup(n);
        let batch: Map<String, Value> = (0..n)
            .map(|i| (format!("new{i}"), json!("blah")))
            .collect();

        let err = controller
            .create_batch("123", &json!({ "metadata": batch }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MetadataError::QuotaExceeded {
                limit: 5,
                requested: 6
            }
        ));
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(stored(&store).await, metadata(&[("key1", "value1")]));
    }

    #[tokio::test]
    async fn test_create_batch_overwrites_count_once() {
        // Quota 2: {key1} + {key1, key2} is 2 entries, not 3.
        let (controller, _, _) = setup(2);
        let result = controller
            .create_batch("123", &json!({"metadata": {"key1": "a", "key2": "b"}}))
            .await
            .unwrap();
        assert_eq!(
            result.payload,
            Payload::Metadata(metadata(&[("key1", "a"), ("key2", "b")]))
        );
    }

    #[tokio::test]
    async fn test_create_batch_malformed_body() {
        let (controller, store, _) = setup(128);
        for body in [
            json!({"meta": {"key7": "value7"}}),
            json!({"metadata": "value7"}),
            json!({"metadata": {}, "extra": {}}),
            json!(["metadata"]),
            Value::Null,
        ] {
            let err = controller.create_batch("123", &body).await.unwrap_err();
            assert!(
                matches!(err, MetadataError::MalformedBody { .. }),
                "{body}"
            );
        }
        assert_eq!(stored(&store).await, metadata(&[("key1", "value1")]));
    }

    // ── replace_all ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_replace_all() {
        let (controller, store, _) = setup(128);
        let body = json!({"metadata": {"key9": "value9"}});
        let result = controller.replace_all("123", &body).await.unwrap();
        assert_eq!(
            result.payload.to_value().unwrap(),
            json!({"metadata": {"key9": "value9"}})
        );
        assert_eq!(stored(&store).await, metadata(&[("key9", "value9")]));

        // Idempotent.
        let again = controller.replace_all("123", &body).await.unwrap();
        assert_eq!(again, result);
        assert_eq!(stored(&store).await, metadata(&[("key9", "value9")]));
    }

    #[tokio::test]
    async fn test_replace_all_quota() {
        let (controller, store, _) = setup(1);
        let err = controller
            .replace_all("123", &json!({"metadata": {"a": "1", "b": "2"}}))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::QuotaExceeded { .. }));
        assert_eq!(stored(&store).await, metadata(&[("key1", "value1")]));

        // Replacing with exactly `limit` entries is allowed even though the
        // old and new sets together would exceed it.
        controller
            .replace_all("123", &json!({"metadata": {"a": "1"}}))
            .await
            .unwrap();
        assert_eq!(stored(&store).await, metadata(&[("a", "1")]));
    }

    // ── upsert_one ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_upsert_one_overwrite() {
        let (controller, store, _) = setup(128);
        let result = controller
            .upsert_one("123", "key1", &json!({"meta": {"key1": "zz"}}))
            .await
            .unwrap();
        assert_eq!(result.status, StatusCode::OK);
        assert_eq!(
            result.payload.to_value().unwrap(),
            json!({"meta": {"key1": "zz"}})
        );
        assert_eq!(stored(&store).await, metadata(&[("key1", "zz")]));
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let (controller, _, _) = setup(128);
        controller
            .upsert_one("123", "key2", &json!({"meta": {"key2": "v"}}))
            .await
            .unwrap();
        let result = controller.get_one("123", "key2").await.unwrap();
        assert_eq!(
            result.payload,
            Payload::Meta {
                key: "key2".into(),
                value: "v".into()
            }
        );
    }

    #[tokio::test]
    async fn test_upsert_one_key_mismatch() {
        let (controller, store, _) = setup(128);
        let err = controller
            .upsert_one("123", "bad", &json!({"meta": {"key1": "value1"}}))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::KeyMismatch { .. }));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(stored(&store).await, metadata(&[("key1", "value1")]));
    }

    #[tokio::test]
    async fn test_upsert_one_bad_body() {
        let (controller, _, _) = setup(128);
        let err = controller
            .upsert_one("123", "key1", &json!({"key1": "zz"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::MalformedBody { .. }));
    }

    #[tokio::test]
    async fn test_upsert_one_too_many_keys_is_malformed() {
        // Shape is checked before the quota.
        let (controller, _, _) = setup(2);
        let overload: Map<String, Value> = (0..3)
            .map(|i| (format!("key{i}"), json!(format!("value{i}"))))
            .collect();
        let err = controller
            .upsert_one("123", "key1", &json!({ "meta": overload }))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::MalformedBody { .. }));
    }

    #[tokio::test]
    async fn test_upsert_one_new_key_over_quota() {
        let (controller, store, _) = setup(1);
        let err = controller
            .upsert_one("123", "blah", &json!({"meta": {"blah": "blah"}}))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::QuotaExceeded { .. }));
        assert_eq!(stored(&store).await, metadata(&[("key1", "value1")]));
    }

    #[tokio::test]
    async fn test_upsert_one_overwrite_exempt_from_quota() {
        // Already at the limit; overwriting must still succeed.
        let (controller, _, _) = setup(1);
        controller
            .upsert_one("123", "key1", &json!({"meta": {"key1": "zz"}}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_one_coerces_scalars() {
        let (controller, store, _) = setup(128);
        controller
            .upsert_one("123", "n", &json!({"meta": {"n": 5}}))
            .await
            .unwrap();
        controller
            .upsert_one("123", "b", &json!({"meta": {"b": true}}))
            .await
            .unwrap();
        let current = stored(&store).await;
        assert_eq!(current["n"], "5");
        assert_eq!(current["b"], "true");

        for bad in [json!(null), json!([1]), json!({"x": 1})] {
            let err = controller
                .upsert_one("123", "k", &json!({"meta": {"k": bad}}))
                .await
                .unwrap_err();
            assert!(matches!(err, MetadataError::MalformedBody { .. }));
        }
    }

    #[tokio::test]
    async fn test_quota_read_at_call_time() {
        let (controller, _, quota) = setup(1);
        let body = json!({"meta": {"key2": "v"}});
        assert!(controller.upsert_one("123", "key2", &body).await.is_err());

        quota.set_max_metadata_items(2);
        assert!(controller.upsert_one("123", "key2", &body).await.is_ok());
    }

    // ── delete_one ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_delete_then_get() {
        let (controller, store, _) = setup(128);
        let result = controller.delete_one("123", "key1").await.unwrap();
        assert_eq!(result.status, StatusCode::NO_CONTENT);
        assert_eq!(result.payload, Payload::Empty);
        assert!(result.payload.to_value().is_none());
        assert!(stored(&store).await.is_empty());

        let err = controller.get_one("123", "key1").await.unwrap_err();
        assert!(matches!(err, MetadataError::KeyNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_key() {
        let (controller, _, _) = setup(128);
        let err = controller.delete_one("123", "blah").await.unwrap_err();
        assert!(matches!(err, MetadataError::KeyNotFound { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_deletes_one_wins() {
        let (controller, store, _) = setup(128);
        let (first, second) = tokio::join!(
            controller.delete_one("123", "key1"),
            controller.delete_one("123", "key1")
        );
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        for outcome in outcomes {
            if let Err(err) = outcome {
                assert!(matches!(err, MetadataError::KeyNotFound { .. }), "{err}");
                assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
            }
        }
        assert!(stored(&store).await.is_empty());
    }

    // ── validation ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_invalid_keys_and_values_rejected() {
        let (controller, store, _) = setup(128);
        let long = "x".repeat(256);
        for body in [
            json!({"metadata": {"": "v"}}),
            json!({"metadata": {long.clone(): "v"}}),
            json!({"metadata": {"k": long}}),
        ] {
            let err = controller.create_batch("123", &body).await.unwrap_err();
            assert!(matches!(err, MetadataError::MalformedBody { .. }));
        }
        assert_eq!(stored(&store).await, metadata(&[("key1", "value1")]));
    }

    // ── image existence ─────────────────────────────────────────────

    #[tokio::test]
    async fn test_unknown_image_always_not_found() {
        let (controller, _, _) = setup(0);
        let requests = [
            (OperationKind::List, None, None),
            (OperationKind::GetOne, Some("key1"), None),
            (OperationKind::GetOne, None, None),
            (
                OperationKind::CreateBatch,
                None,
                Some(json!({"metadata": {"key7": "value7"}})),
            ),
            (OperationKind::CreateBatch, None, Some(json!("garbage"))),
            (
                OperationKind::ReplaceAll,
                None,
                Some(json!({"metadata": {"key9": "value9"}})),
            ),
            (
                OperationKind::UpsertOne,
                Some("key1"),
                Some(json!({"meta": {"key1": "zz"}})),
            ),
            (
                OperationKind::UpsertOne,
                Some("bad"),
                Some(json!({"meta": {"key1": "zz"}})),
            ),
            (OperationKind::DeleteOne, Some("key1"), None),
        ];

        for (kind, key, body) in requests {
            let err = controller
                .dispatch(OperationRequest {
                    kind,
                    image_id: "100".to_string(),
                    key: key.map(str::to_string),
                    body,
                })
                .await
                .unwrap_err();
            assert!(
                matches!(err, MetadataError::ImageNotFound { .. }),
                "{}",
                kind.as_str()
            );
            assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_operations() {
        let (controller, store, _) = setup(128);
        let result = controller
            .dispatch(OperationRequest {
                kind: OperationKind::UpsertOne,
                image_id: "123".to_string(),
                key: Some("key1".to_string()),
                body: Some(json!({"meta": {"key1": "zz"}})),
            })
            .await
            .unwrap();
        assert_eq!(result.status, StatusCode::OK);

        let result = controller
            .dispatch(OperationRequest {
                kind: OperationKind::DeleteOne,
                image_id: "123".to_string(),
                key: Some("key1".to_string()),
                body: None,
            })
            .await
            .unwrap();
        assert_eq!(result.status, StatusCode::NO_CONTENT);
        assert!(stored(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_missing_key_or_body() {
        let (controller, _, _) = setup(128);
        let err = controller
            .dispatch(OperationRequest {
                kind: OperationKind::DeleteOne,
                image_id: "123".to_string(),
                key: None,
                body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::MalformedBody { .. }));

        let err = controller
            .dispatch(OperationRequest {
                kind: OperationKind::ReplaceAll,
                image_id: "123".to_string(),
                key: None,
                body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::MalformedBody { .. }));
    }
}
