//! Deterministic in-memory object store.
//!
//! Mirrors the behaviour of a real backend without network or disk I/O: no
//! TTLs, no versioning, instant consistency. Used by unit tests and the
//! integration scenarios; production code never instantiates it.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{ObjectStorage, ObjectStorageError};

/// In-memory implementation of [`ObjectStorage`].
#[derive(Default)]
pub struct MemoryStorage {
    objects: DashMap<String, Bytes>,
}

impl MemoryStorage {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn compose(bucket: &str, key: &str) -> String {
        format!("{bucket}/{key}")
    }

    /// Number of objects held, across all buckets.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, ObjectStorageError> {
        self.objects
            .get(&Self::compose(bucket, key))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ObjectStorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), ObjectStorageError> {
        self.objects.insert(Self::compose(bucket, key), data);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), ObjectStorageError> {
        self.objects
            .remove(&Self::compose(bucket, key))
            .map(|_| ())
            .ok_or_else(|| ObjectStorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn has(&self, bucket: &str, key: &str) -> Result<bool, ObjectStorageError> {
        Ok(self.objects.contains_key(&Self::compose(bucket, key)))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ObjectStorageError> {
        let scope = Self::compose(bucket, prefix);
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(&scope))
            .map(|entry| entry.key()[bucket.len() + 1..].to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let store = MemoryStorage::new();
        store
            .put("meta", "networks/byID/abc", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(
            store.get("meta", "networks/byID/abc").await.unwrap(),
            Bytes::from_static(b"{}")
        );
        assert!(store.has("meta", "networks/byID/abc").await.unwrap());
        store.delete("meta", "networks/byID/abc").await.unwrap();
        assert!(!store.has("meta", "networks/byID/abc").await.unwrap());
    }

    #[tokio::test]
    async fn get_of_absent_key_is_not_found() {
        let store = MemoryStorage::new();
        let err = store.get("meta", "networks/byID/ghost").await.unwrap_err();
        assert!(matches!(err, ObjectStorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_is_scoped_and_ordered() {
        let store = MemoryStorage::new();
        for key in ["networks/byID/b", "networks/byID/a", "hosts/byID/x"] {
            store.put("meta", key, Bytes::new()).await.unwrap();
        }
        let keys = store.list("meta", "networks/byID/").await.unwrap();
        assert_eq!(keys, vec!["networks/byID/a", "networks/byID/b"]);
    }

    #[tokio::test]
    async fn buckets_are_isolated() {
        let store = MemoryStorage::new();
        store.put("meta-a", "k", Bytes::new()).await.unwrap();
        assert!(!store.has("meta-b", "k").await.unwrap());
    }
}
