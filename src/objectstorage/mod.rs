//! Object-storage contract used for out-of-band metadata.
//!
//! Resource metadata is persisted in an object store, out of band of the
//! provider's own state, so that provider outages never take the control
//! plane's view of the world with them. Production deployments plug a real
//! backend (Swift, S3, GCS) behind [`ObjectStorage`]; tests use the
//! deterministic [`MemoryStorage`].

pub mod inmemory;

pub use inmemory::MemoryStorage;

use async_trait::async_trait;
use bytes::Bytes;
use snafu::Snafu;

/// Errors from the object-storage backend.
#[derive(Debug, Snafu)]
pub enum ObjectStorageError {
    /// The requested object does not exist.
    #[snafu(display("object '{key}' not found in bucket '{bucket}'"))]
    NotFound {
        /// Bucket that was addressed.
        bucket: String,
        /// Key that was missing.
        key: String,
    },

    /// The backend failed for a reason other than absence.
    #[snafu(display("object storage backend error: {message}"))]
    Backend {
        /// Backend-specific description.
        message: String,
    },
}

/// A minimal bucket/key object store.
///
/// Keys are flat strings; the folder layering above this trait encodes the
/// `<kind>/<index>/<name>` structure in the key.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Fetch the object at `bucket`/`key`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, ObjectStorageError>;

    /// Store `data` at `bucket`/`key`, overwriting any previous object.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), ObjectStorageError>;

    /// Remove the object at `bucket`/`key`.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), ObjectStorageError>;

    /// True when an object exists at `bucket`/`key`.
    async fn has(&self, bucket: &str, key: &str) -> Result<bool, ObjectStorageError>;

    /// List the keys under `prefix` in `bucket`, in lexical order.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ObjectStorageError>;
}
