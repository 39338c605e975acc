//! Cloneable payload guarded by a tasked lock.

use parking_lot::Mutex;

use crate::fail::{Failure, merge_unlock};

use super::task::Task;
use super::tasked_lock::TaskedLock;

/// A payload that can only be observed or mutated under lock discipline.
///
/// `inspect` takes a shared read lock and hands the callback a snapshot;
/// `alter` takes the exclusive write lock, hands the callback a deep clone of
/// the payload and commits it atomically when the callback returns `Ok`. A
/// callback error leaves the guarded payload untouched, and an `alter`
/// always observes the modifications committed by previously released locks
/// on the same value.
pub struct Shielded<T: Clone> {
    lock: TaskedLock,
    payload: Mutex<T>,
}

impl<T: Clone + Send> Shielded<T> {
    /// Wrap `payload` under a fresh lock.
    pub fn new(payload: T) -> Self {
        Self {
            lock: TaskedLock::new(),
            payload: Mutex::new(payload),
        }
    }

    /// Observe the payload under a shared read lock.
    pub async fn inspect<R, F>(&self, task: &Task, callback: F) -> Result<R, Failure>
    where
        F: AsyncFnOnce(&T) -> Result<R, Failure>,
    {
        self.lock.lock_read(task).await;
        let snapshot = self.payload.lock().clone();
        let outcome = callback(&snapshot).await;
        merge_unlock(outcome, self.lock.unlock_read(task))
    }

    /// Mutate the payload under the exclusive write lock.
    ///
    /// The callback works on a clone; the clone replaces the guarded payload
    /// only when the callback returns `Ok`.
    pub async fn alter<R, F>(&self, task: &Task, callback: F) -> Result<R, Failure>
    where
        F: AsyncFnOnce(&mut T) -> Result<R, Failure>,
    {
        self.lock.lock_write(task).await;
        let mut draft = self.payload.lock().clone();
        let outcome = callback(&mut draft).await;
        if outcome.is_ok() {
            *self.payload.lock() = draft;
        }
        merge_unlock(outcome, self.lock.unlock_write(task))
    }

    /// Replace the payload wholesale under the write lock.
    ///
    /// Used by reloads, where the new revision comes from storage rather than
    /// from a mutation of the current one.
    pub async fn replace(&self, task: &Task, payload: T) {
        self.lock.lock_write(task).await;
        *self.payload.lock() = payload;
        // The write lock was acquired two lines up; release cannot fail.
        let _ = self.lock.unlock_write(task);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        value: u64,
    }

    #[tokio::test]
    async fn alter_commits_on_ok() {
        let shielded = Shielded::new(Counter { value: 0 });
        let task = Task::new();
        shielded
            .alter(&task, async |counter| {
                counter.value += 1;
                Ok(())
            })
            .await
            .unwrap();
        let seen = shielded
            .inspect(&task, async |counter| Ok(counter.value))
            .await
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn alter_discards_on_error() {
        let shielded = Shielded::new(Counter { value: 7 });
        let task = Task::new();
        let failure = shielded
            .alter(&task, async |counter| {
                counter.value = 99;
                Err::<(), _>(Failure::invalid_request("rejected"))
            })
            .await
            .unwrap_err();
        assert_eq!(failure.message(), "rejected");
        let seen = shielded
            .inspect(&task, async |counter| Ok(counter.value))
            .await
            .unwrap();
        assert_eq!(seen, 7);
    }

    #[tokio::test]
    async fn alter_observes_previous_commits() {
        let shielded = Shielded::new(Counter { value: 0 });
        let first = Task::new();
        let second = Task::new();
        shielded
            .alter(&first, async |counter| {
                counter.value = 10;
                Ok(())
            })
            .await
            .unwrap();
        shielded
            .alter(&second, async |counter| {
                assert_eq!(counter.value, 10);
                counter.value += 1;
                Ok(())
            })
            .await
            .unwrap();
        let seen = shielded
            .inspect(&first, async |counter| Ok(counter.value))
            .await
            .unwrap();
        assert_eq!(seen, 11);
    }

    #[tokio::test]
    async fn replace_installs_a_new_revision() {
        let shielded = Shielded::new(Counter { value: 1 });
        let task = Task::new();
        shielded.replace(&task, Counter { value: 5 }).await;
        let seen = shielded
            .inspect(&task, async |counter| Ok(counter.clone()))
            .await
            .unwrap();
        assert_eq!(seen, Counter { value: 5 });
    }
}
