//! Reader/writer lock keyed by task identity.
//!
//! Unlike an ordinary RW lock, acquisition and release take a [`Task`]: a
//! task that already holds the write lock may reacquire read or write at any
//! depth without deadlocking, provided releases balance acquisitions. A task
//! holding only a read lock may upgrade to write when no other reader is
//! present. Releasing from a task that does not hold the lock is an
//! invariant violation and fails fast.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::fail::Failure;

use super::task::{Task, TaskId};

#[derive(Default)]
struct LockState {
    writer: Option<TaskId>,
    write_depth: u32,
    readers: HashMap<TaskId, u32>,
}

impl LockState {
    fn other_readers(&self, me: TaskId) -> bool {
        self.readers.keys().any(|id| *id != me)
    }
}

/// A reentrant reader/writer lock whose ownership is task identity.
#[derive(Default)]
pub struct TaskedLock {
    state: Mutex<LockState>,
    released: Notify,
}

impl TaskedLock {
    /// A fresh, unheld lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a shared read lock for `task`, waiting as needed.
    ///
    /// Reacquiring under an already-held write or read lock of the same task
    /// only bumps a counter.
    pub async fn lock_read(&self, task: &Task) {
        let me = task.id();
        loop {
            // Register for wakeups before inspecting the state, so a release
            // landing in between is not lost.
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.writer == Some(me) || state.writer.is_none() {
                    *state.readers.entry(me).or_insert(0) += 1;
                    trace!(task = %me, "read lock acquired");
                    return;
                }
            }
            released.await;
        }
    }

    /// Acquire the exclusive write lock for `task`, waiting as needed.
    ///
    /// Reentrant for the task already holding write. A task holding a read
    /// lock upgrades only once every other reader has released.
    pub async fn lock_write(&self, task: &Task) {
        let me = task.id();
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.writer == Some(me) {
                    state.write_depth += 1;
                    trace!(task = %me, depth = state.write_depth, "write lock reentered");
                    return;
                }
                if state.writer.is_none() && !state.other_readers(me) {
                    state.writer = Some(me);
                    state.write_depth = 1;
                    trace!(task = %me, "write lock acquired");
                    return;
                }
            }
            released.await;
        }
    }

    /// Release one read acquisition held by `task`.
    ///
    /// Fails fast with `Inconsistent` if the task holds no read lock.
    pub fn unlock_read(&self, task: &Task) -> Result<(), Failure> {
        let me = task.id();
        let mut state = self.state.lock();
        let Some(depth) = state.readers.get_mut(&me) else {
            return Err(Failure::inconsistent(format!(
                "task {me} tried to release a read lock it does not hold"
            )));
        };
        *depth -= 1;
        if *depth == 0 {
            state.readers.remove(&me);
        }
        drop(state);
        self.released.notify_waiters();
        Ok(())
    }

    /// Release one write acquisition held by `task`.
    ///
    /// Fails fast with `Inconsistent` if the task is not the writer.
    pub fn unlock_write(&self, task: &Task) -> Result<(), Failure> {
        let me = task.id();
        let mut state = self.state.lock();
        if state.writer != Some(me) {
            return Err(Failure::inconsistent(format!(
                "task {me} tried to release a write lock it does not hold"
            )));
        }
        state.write_depth -= 1;
        if state.write_depth == 0 {
            state.writer = None;
        }
        drop(state);
        self.released.notify_waiters();
        Ok(())
    }
}
