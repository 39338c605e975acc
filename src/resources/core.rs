//! Generic persistent object backing every resource kind.
//!
//! A [`Core`] couples a shielded payload, its versioned properties and the
//! metadata folder the pair persists into. An instance is either **null**
//! (structural kind only, no payload) or **carrying** (payload pinned,
//! identity cached); the transition from null to carrying is one-way through
//! [`Core::carry`] or [`Core::read`], and [`Core::delete`] clears the
//! carrier again.
//!
//! Every `inspect` and `alter` reloads from object storage first, so a
//! callback never observes a revision older than the start of its own
//! operation; staleness within the operation is tolerated. `alter` writes
//! both folder indices before releasing the lock, repairing any divergence
//! between them as a side effect.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::abstractions::Identifiable;
use crate::concurrency::{Properties, Shielded, Task, TaskedLock};
use crate::fail::{Failure, FailureKind, merge_unlock};
use crate::metadata::{FolderIndex, MetadataFolder};
use crate::retry::{self, RetryError, Verdict};

/// Delay between metadata read attempts; object storage is eventually
/// consistent.
const METADATA_READ_DELAY: Duration = Duration::from_secs(1);
/// Total wall-clock budget for resolving a metadata reference.
const METADATA_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// A payload a [`Core`] can carry.
pub trait ResourcePayload:
    Identifiable + Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
}

impl<T> ResourcePayload for T where
    T: Identifiable + Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
}

/// On-disk shape of a metadata entry: the payload's own fields, plus the
/// opaque property payloads keyed by versioned property name.
#[derive(Serialize, Deserialize)]
struct Envelope<P> {
    #[serde(flatten)]
    payload: P,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, serde_json::Value>,
}

/// The core functions of a persistent object.
pub struct Core<P: ResourcePayload> {
    kind: &'static str,
    folder: MetadataFolder,
    carrier: RwLock<Option<Arc<Shielded<P>>>>,
    properties: Properties,
    lock: TaskedLock,
    cached_id: RwLock<String>,
    cached_name: RwLock<String>,
}

impl<P: ResourcePayload> Core<P> {
    /// A null core of the given kind, persisting into `folder`.
    pub fn new(kind: &'static str, folder: MetadataFolder) -> Self {
        Self {
            kind,
            folder,
            carrier: RwLock::new(None),
            properties: Properties::new(),
            lock: TaskedLock::new(),
            cached_id: RwLock::new(String::new()),
            cached_name: RwLock::new(String::new()),
        }
    }

    /// The resource kind this core persists.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// True once a payload is pinned.
    pub fn is_carrying(&self) -> bool {
        self.carrier.read().is_some()
    }

    /// Last-known id of the carried payload; empty while null.
    pub fn cached_id(&self) -> String {
        self.cached_id.read().clone()
    }

    /// Last-known name of the carried payload; empty while null.
    pub fn cached_name(&self) -> String {
        self.cached_name.read().clone()
    }

    fn carrier(&self) -> Result<Arc<Shielded<P>>, Failure> {
        self.carrier
            .read()
            .as_ref()
            .cloned()
            .ok_or_else(Failure::invalid_instance)
    }

    /// Pin `payload` into a null instance and persist it.
    ///
    /// Fails with `NotAvailable` when the instance already carries a value.
    pub async fn carry(&self, task: &Task, payload: P) -> Result<(), Failure> {
        if self.is_carrying() {
            return Err(Failure::not_available("already carrying a value"));
        }
        self.lock.lock_write(task).await;
        let outcome = async {
            self.install(task, payload, BTreeMap::new()).await;
            self.write(task).await
        }
        .await;
        merge_unlock(outcome, self.lock.unlock_write(task))
    }

    /// Resolve `reference` as an id, then as a name, and pin the stored
    /// payload.
    ///
    /// Object storage is eventually consistent, so absence is retried for up
    /// to ten seconds; any other failure stops the retry immediately.
    /// Exhausting the budget reports `NotFound`.
    pub async fn read(&self, task: &Task, reference: &str) -> Result<(), Failure> {
        if reference.is_empty() {
            return Err(Failure::invalid_parameter("reference", "cannot be empty"));
        }
        if self.is_carrying() {
            return Err(Failure::not_available("metadata is already carrying a value"));
        }
        self.lock.lock_write(task).await;
        let outcome = retry::bounded(METADATA_READ_DELAY, METADATA_READ_TIMEOUT, || async {
            match self.folder.read_by_reference(reference).await {
                Ok(bytes) => match self.decode(&bytes) {
                    Ok(decoded) => Verdict::Done(decoded),
                    Err(failure) => Verdict::Stop(failure),
                },
                Err(failure) if failure.is(FailureKind::NotFound) => Verdict::Retry(failure),
                Err(failure) => Verdict::Stop(failure),
            }
        })
        .await;
        let outcome = match outcome {
            Ok((payload, bag)) => {
                self.install(task, payload, bag).await;
                Ok(())
            }
            Err(RetryError::Timeout { .. }) => {
                debug!(kind = self.kind, %reference, "timeout reading metadata");
                Err(Failure::not_found(format!(
                    "failed to load metadata of {} '{}'",
                    self.kind, reference
                )))
            }
            Err(RetryError::Stopped { failure }) => Err(failure),
        };
        merge_unlock(outcome, self.lock.unlock_write(task))
    }

    /// Observe the payload and properties under shared lock, on the latest
    /// stored revision.
    pub async fn inspect<R, F>(&self, task: &Task, callback: F) -> Result<R, Failure>
    where
        F: AsyncFnOnce(&P, &Properties) -> Result<R, Failure>,
    {
        let shielded = self.carrier()?;
        self.lock.lock_read(task).await;
        let outcome = async {
            self.reload_locked(task).await?;
            shielded
                .inspect(task, async |payload| {
                    callback(payload, &self.properties).await
                })
                .await
        }
        .await;
        merge_unlock(outcome, self.lock.unlock_read(task))
    }

    /// Mutate the payload and properties under exclusive lock, on the latest
    /// stored revision, and persist both indices.
    ///
    /// When the callback errors nothing is written and the in-memory
    /// revision remains the one just reloaded.
    pub async fn alter<R, F>(&self, task: &Task, callback: F) -> Result<R, Failure>
    where
        F: AsyncFnOnce(&mut P, &Properties) -> Result<R, Failure>,
    {
        let shielded = self.carrier()?;
        self.lock.lock_write(task).await;
        let outcome = async {
            self.reload_locked(task).await?;
            let value = shielded
                .alter(task, async |payload| {
                    callback(payload, &self.properties).await
                })
                .await?;
            self.write(task).await?;
            Ok(value)
        }
        .await;
        merge_unlock(outcome, self.lock.unlock_write(task))
    }

    /// Re-read the carried payload from storage, overriding the in-memory
    /// revision.
    pub async fn reload(&self, task: &Task) -> Result<(), Failure> {
        if !self.is_carrying() {
            return Err(Failure::invalid_instance());
        }
        self.lock.lock_write(task).await;
        let outcome = self.reload_locked(task).await;
        merge_unlock(outcome, self.lock.unlock_write(task))
    }

    /// Remove both metadata indices and null the carrier.
    ///
    /// Either index missing is tolerated, so a half-written pair from an
    /// earlier failure still deletes cleanly. Afterwards every operation
    /// except `carry`, `read` and `browse` reports `InvalidInstance`.
    pub async fn delete(&self, task: &Task) -> Result<(), Failure> {
        if !self.is_carrying() {
            return Err(Failure::invalid_instance());
        }
        self.lock.lock_write(task).await;
        let outcome = async {
            let id = self.cached_id();
            let name = self.cached_name();
            let id_found = self.folder.search(FolderIndex::ById, &id).await?;
            let name_found = self.folder.search(FolderIndex::ByName, &name).await?;
            if id_found {
                self.folder.delete(FolderIndex::ById, &id).await?;
            }
            if name_found {
                self.folder.delete(FolderIndex::ByName, &name).await?;
            }
            *self.carrier.write() = None;
            debug!(kind = self.kind, %name, "metadata deleted");
            Ok(())
        }
        .await;
        merge_unlock(outcome, self.lock.unlock_write(task))
    }

    /// Iterate the raw `byID` entries of this kind's folder.
    ///
    /// Works on null instances too; deserialisation is the caller's job.
    pub async fn browse<F>(&self, task: &Task, callback: F) -> Result<(), Failure>
    where
        F: FnMut(&[u8]) -> Result<(), Failure>,
    {
        task.check_abort()?;
        self.folder.browse(FolderIndex::ById, callback).await
    }

    async fn reload_locked(&self, task: &Task) -> Result<(), Failure> {
        let id = self.cached_id();
        match self.folder.read(FolderIndex::ById, &id).await {
            Ok(bytes) => {
                let (payload, bag) = self.decode(&bytes)?;
                self.install(task, payload, bag).await;
                Ok(())
            }
            Err(failure) if failure.is(FailureKind::NotFound) => Err(Failure::not_found(format!(
                "the metadata of {} '{}' vanished",
                self.kind,
                self.cached_name()
            ))),
            Err(failure) => Err(failure),
        }
    }

    async fn install(
        &self,
        task: &Task,
        payload: P,
        bag: BTreeMap<String, serde_json::Value>,
    ) {
        *self.cached_id.write() = payload.id().to_string();
        *self.cached_name.write() = payload.name().to_string();
        let existing = self.carrier.read().as_ref().cloned();
        match existing {
            Some(shielded) => shielded.replace(task, payload).await,
            None => *self.carrier.write() = Some(Arc::new(Shielded::new(payload))),
        }
        self.properties.replace(task, bag).await;
    }

    async fn write(&self, task: &Task) -> Result<(), Failure> {
        let shielded = self.carrier()?;
        let (id, name, payload) = shielded
            .inspect(task, async |payload| {
                Ok((
                    payload.id().to_string(),
                    payload.name().to_string(),
                    payload.clone(),
                ))
            })
            .await?;
        let envelope = Envelope {
            payload,
            properties: self.properties.snapshot(task).await,
        };
        let encoded = serde_json::to_vec(&envelope).map_err(|err| {
            Failure::inconsistent(format!("failed to serialize {} metadata: {err}", self.kind))
        })?;
        let bytes = Bytes::from(encoded);
        self.folder
            .write(FolderIndex::ByName, &name, bytes.clone())
            .await?;
        self.folder.write(FolderIndex::ById, &id, bytes).await
    }

    fn decode(&self, bytes: &[u8]) -> Result<(P, BTreeMap<String, serde_json::Value>), Failure> {
        let envelope: Envelope<P> = serde_json::from_slice(bytes).map_err(|err| {
            Failure::invalid_instance_content(format!(
                "failed to deserialize {} metadata: {err}",
                self.kind
            ))
        })?;
        Ok((envelope.payload, envelope.properties))
    }
}
