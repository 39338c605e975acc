//! Versioned named property extensions of a resource payload.
//!
//! A resource's payload carries its intrinsic fields; everything else hangs
//! off the payload as *properties*: named, versioned, independently evolving
//! extensions. The key encodes the schema version (`hosts.v1`); a future
//! `hosts.v2` coexists under its own key and never reinterprets `v1` entries.
//! At rest, properties serialise as an opaque JSON object per key inside the
//! metadata envelope.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::fail::{Failure, merge_unlock};

use super::task::Task;
use super::tasked_lock::TaskedLock;

/// A payload stored under a versioned property key.
///
/// The key is part of the type, so a key/type mismatch is unrepresentable at
/// call sites.
pub trait Property:
    Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static
{
    /// The versioned property name, e.g. `hosts.v1`.
    const KEY: &'static str;
}

/// An open container of versioned property payloads.
///
/// `inspect` and `alter` follow the [`super::Shielded`] discipline, one key
/// at a time: an unknown key is an error on `inspect` and lazily materialises
/// an empty payload on `alter`.
#[derive(Default)]
pub struct Properties {
    lock: TaskedLock,
    bag: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl Properties {
    /// An empty property container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the payload stored under `P::KEY`.
    ///
    /// Errors with `NotFound` when the property was never written.
    pub async fn inspect<P, R, F>(&self, task: &Task, callback: F) -> Result<R, Failure>
    where
        P: Property,
        F: FnOnce(&P) -> Result<R, Failure>,
    {
        self.lock.lock_read(task).await;
        let outcome = self.decode::<P>().and_then(|payload| match payload {
            Some(payload) => callback(&payload),
            None => Err(Failure::not_found(format!(
                "property '{}' not found",
                P::KEY
            ))),
        });
        merge_unlock(outcome, self.lock.unlock_read(task))
    }

    /// Mutate the payload stored under `P::KEY`, creating an empty one when
    /// the key was never written.
    ///
    /// The callback works on a clone; the result replaces the stored entry
    /// only when the callback returns `Ok`.
    pub async fn alter<P, R, F>(&self, task: &Task, callback: F) -> Result<R, Failure>
    where
        P: Property,
        F: FnOnce(&mut P) -> Result<R, Failure>,
    {
        self.lock.lock_write(task).await;
        let outcome = self.decode::<P>().and_then(|payload| {
            let mut draft = payload.unwrap_or_default();
            let result = callback(&mut draft)?;
            let encoded = serde_json::to_value(&draft).map_err(|err| {
                Failure::inconsistent(format!(
                    "failed to encode property '{}': {err}",
                    P::KEY
                ))
            })?;
            self.bag.lock().insert(P::KEY.to_string(), encoded);
            Ok(result)
        });
        merge_unlock(outcome, self.lock.unlock_write(task))
    }

    /// Snapshot the raw property map for serialisation into the metadata
    /// envelope.
    pub async fn snapshot(&self, task: &Task) -> BTreeMap<String, serde_json::Value> {
        self.lock.lock_read(task).await;
        let copy = self.bag.lock().clone();
        let _ = self.lock.unlock_read(task);
        copy
    }

    /// Replace the whole property map with the one read from storage.
    pub async fn replace(&self, task: &Task, bag: BTreeMap<String, serde_json::Value>) {
        self.lock.lock_write(task).await;
        *self.bag.lock() = bag;
        let _ = self.lock.unlock_write(task);
    }

    fn decode<P: Property>(&self) -> Result<Option<P>, Failure> {
        let raw = self.bag.lock().get(P::KEY).cloned();
        match raw {
            None => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|err| {
                Failure::invalid_instance_content(format!(
                    "content of property '{}' is invalid: {err}",
                    P::KEY
                ))
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use crate::fail::FailureKind;

    use super::*;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct Tags {
        entries: BTreeMap<String, String>,
    }

    impl Property for Tags {
        const KEY: &'static str = "tags.v1";
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct TagsV2 {
        entries: BTreeMap<String, Vec<String>>,
    }

    impl Property for TagsV2 {
        const KEY: &'static str = "tags.v2";
    }

    #[tokio::test]
    async fn inspect_unknown_key_is_not_found() {
        let properties = Properties::new();
        let task = Task::new();
        let failure = properties
            .inspect::<Tags, (), _>(&task, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(failure.is(FailureKind::NotFound));
    }

    #[tokio::test]
    async fn alter_materialises_an_empty_payload() {
        let properties = Properties::new();
        let task = Task::new();
        properties
            .alter::<Tags, _, _>(&task, |tags| {
                assert!(tags.entries.is_empty());
                tags.entries.insert("role".into(), "gateway".into());
                Ok(())
            })
            .await
            .unwrap();
        let role = properties
            .inspect::<Tags, _, _>(&task, |tags| Ok(tags.entries["role"].clone()))
            .await
            .unwrap();
        assert_eq!(role, "gateway");
    }

    #[tokio::test]
    async fn alter_discards_on_callback_error() {
        let properties = Properties::new();
        let task = Task::new();
        let _ = properties
            .alter::<Tags, (), _>(&task, |tags| {
                tags.entries.insert("role".into(), "gateway".into());
                Err(Failure::invalid_request("rejected"))
            })
            .await;
        let failure = properties
            .inspect::<Tags, (), _>(&task, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(failure.is(FailureKind::NotFound));
    }

    #[tokio::test]
    async fn versions_coexist_without_rewriting() {
        let properties = Properties::new();
        let task = Task::new();
        properties
            .alter::<Tags, _, _>(&task, |tags| {
                tags.entries.insert("role".into(), "gateway".into());
                Ok(())
            })
            .await
            .unwrap();
        properties
            .alter::<TagsV2, _, _>(&task, |tags| {
                tags.entries
                    .insert("role".into(), vec!["gateway".into(), "router".into()]);
                Ok(())
            })
            .await
            .unwrap();
        let snapshot = properties.snapshot(&task).await;
        assert!(snapshot.contains_key("tags.v1"));
        assert!(snapshot.contains_key("tags.v2"));
    }
}
