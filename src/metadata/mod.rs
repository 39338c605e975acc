//! Object-storage-backed metadata folders.
//!
//! Each resource kind owns a folder rooted at `<bucket>/<kind>/`, split into
//! two subfolders, `byID/` and `byName/`, whose entries are byte-identical
//! serialisations of the same payload. The two indices are the authoritative
//! storage; there is no separate index file. Callers that do not know which
//! key they hold resolve through [`MetadataFolder::read_by_reference`].

use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::fail::{Failure, FailureKind};
use crate::objectstorage::{ObjectStorage, ObjectStorageError};

/// The two index subfolders of a metadata folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderIndex {
    /// Entries keyed by provider-assigned resource id.
    ById,
    /// Entries keyed by user-facing resource name.
    ByName,
}

impl FolderIndex {
    /// Subfolder name in the object store.
    pub fn as_str(self) -> &'static str {
        match self {
            FolderIndex::ById => "byID",
            FolderIndex::ByName => "byName",
        }
    }
}

/// A kind-scoped key/value folder in object storage.
#[derive(Clone)]
pub struct MetadataFolder {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    kind: &'static str,
}

impl MetadataFolder {
    /// A folder for `kind` under `bucket`.
    pub fn new(storage: Arc<dyn ObjectStorage>, bucket: impl Into<String>, kind: &'static str) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
            kind,
        }
    }

    /// The resource kind this folder stores.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    fn path(&self, index: FolderIndex, key: &str) -> String {
        format!("{}/{}/{}", self.kind, index.as_str(), key)
    }

    /// Read the entry stored under `index`/`key`.
    pub async fn read(&self, index: FolderIndex, key: &str) -> Result<Bytes, Failure> {
        let path = self.path(index, key);
        match self.storage.get(&self.bucket, &path).await {
            Ok(bytes) => Ok(bytes),
            Err(ObjectStorageError::NotFound { .. }) => Err(Failure::not_found(format!(
                "no {} metadata entry '{}/{}'",
                self.kind,
                index.as_str(),
                key
            ))),
            Err(backend) => Err(storage_unavailable(backend)),
        }
    }

    /// Resolve `reference` as an id first, then as a name.
    pub async fn read_by_reference(&self, reference: &str) -> Result<Bytes, Failure> {
        match self.read(FolderIndex::ById, reference).await {
            Ok(bytes) => Ok(bytes),
            Err(failure) if failure.is(FailureKind::NotFound) => {
                self.read(FolderIndex::ByName, reference).await
            }
            Err(failure) => Err(failure),
        }
    }

    /// Store `bytes` under `index`/`key`.
    ///
    /// Callers keep the invariant that both indices receive the same bytes
    /// for the same resource.
    pub async fn write(&self, index: FolderIndex, key: &str, bytes: Bytes) -> Result<(), Failure> {
        let path = self.path(index, key);
        trace!(kind = self.kind, %path, len = bytes.len(), "writing metadata entry");
        self.storage
            .put(&self.bucket, &path, bytes)
            .await
            .map_err(storage_unavailable)
    }

    /// Remove the entry under `index`/`key`.
    pub async fn delete(&self, index: FolderIndex, key: &str) -> Result<(), Failure> {
        let path = self.path(index, key);
        match self.storage.delete(&self.bucket, &path).await {
            Ok(()) => Ok(()),
            Err(ObjectStorageError::NotFound { .. }) => Err(Failure::not_found(format!(
                "no {} metadata entry '{}/{}'",
                self.kind,
                index.as_str(),
                key
            ))),
            Err(backend) => Err(storage_unavailable(backend)),
        }
    }

    /// Probe whether an entry exists under `index`/`key`.
    ///
    /// Deletion uses this to tolerate a half-written pair where only one
    /// index survived a previous failure.
    pub async fn search(&self, index: FolderIndex, key: &str) -> Result<bool, Failure> {
        let path = self.path(index, key);
        self.storage
            .has(&self.bucket, &path)
            .await
            .map_err(storage_unavailable)
    }

    /// Iterate the entries of `index`, feeding each raw payload to
    /// `callback`. Deserialisation is the caller's job.
    pub async fn browse<F>(&self, index: FolderIndex, mut callback: F) -> Result<(), Failure>
    where
        F: FnMut(&[u8]) -> Result<(), Failure>,
    {
        let prefix = format!("{}/{}/", self.kind, index.as_str());
        let keys = self
            .storage
            .list(&self.bucket, &prefix)
            .await
            .map_err(storage_unavailable)?;
        for key in keys {
            let bytes = self
                .storage
                .get(&self.bucket, &key)
                .await
                .map_err(storage_unavailable)?;
            callback(&bytes)?;
        }
        Ok(())
    }
}

fn storage_unavailable(backend: ObjectStorageError) -> Failure {
    Failure::not_available("object storage unavailable").with_cause(backend)
}
