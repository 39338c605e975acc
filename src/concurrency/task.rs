//! Hierarchical cancelable units of work.
//!
//! A [`Task`] is the logical identity under which the core serialises work:
//! locks recognise reentrancy by task id, and cancellation propagates from a
//! task to its live subtasks. Actions run on the tokio runtime; cancellation
//! is cooperative: long-running actions poll [`Task::aborted`] at natural
//! checkpoints, and in-flight provider calls are never cut mid-flight.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::fail::{self, Failure, FailureKind};

/// Opaque task identity; the reentrancy key for [`super::TaskedLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created, no action started yet.
    Ready,
    /// An action is running.
    Running,
    /// The action returned.
    Done,
    /// [`Task::abort`] was called; the action may still be draining.
    Aborted,
}

struct TaskInner {
    id: TaskId,
    status: Mutex<TaskStatus>,
    cancel: CancellationToken,
}

/// A logical unit of work with identity, status and subtasks.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create a fresh root task in the `Ready` state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId(Uuid::new_v4()),
                status: Mutex::new(TaskStatus::Ready),
                cancel: CancellationToken::new(),
            }),
        }
    }

    fn child(&self) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId(Uuid::new_v4()),
                status: Mutex::new(TaskStatus::Running),
                cancel: self.inner.cancel.child_token(),
            }),
        }
    }

    /// This task's identity.
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Current status. Abort wins over whatever was stored.
    pub fn status(&self) -> TaskStatus {
        if self.inner.cancel.is_cancelled() {
            return TaskStatus::Aborted;
        }
        *self.inner.status.lock()
    }

    /// Request cooperative cancellation of this task and its live subtasks.
    pub fn abort(&self) {
        *self.inner.status.lock() = TaskStatus::Aborted;
        self.inner.cancel.cancel();
    }

    /// True once this task (or an ancestor) was aborted.
    pub fn aborted(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Cooperative checkpoint: errors with [`FailureKind::Aborted`] when the
    /// task was aborted.
    pub fn check_abort(&self) -> Result<(), Failure> {
        if self.aborted() {
            return Err(Failure::aborted());
        }
        Ok(())
    }

    /// Run `action` as this task.
    ///
    /// The task transitions to `Running`; the action receives a handle to the
    /// task so it can poll for abort. The returned [`Subtask`] joins the
    /// action.
    pub fn start<T, F, Fut>(&self, action: F) -> Subtask<T>
    where
        T: Send + 'static,
        F: FnOnce(Task) -> Fut,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    {
        *self.inner.status.lock() = TaskStatus::Running;
        let handle = tokio::spawn(fail::panic_shield(action(self.clone())));
        Subtask {
            task: self.clone(),
            handle,
        }
    }

    /// Run `action` concurrently as a new subtask of this task.
    ///
    /// Aborting `self` propagates to the subtask; a failed subtask does not
    /// cancel its siblings unless the parent explicitly aborts.
    pub fn start_in_subtask<T, F, Fut>(&self, action: F) -> Subtask<T>
    where
        T: Send + 'static,
        F: FnOnce(Task) -> Fut,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    {
        let child = self.child();
        let handle = tokio::spawn(fail::panic_shield(action(child.clone())));
        Subtask {
            task: child,
            handle,
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on a running action; joins it and carries its task identity.
pub struct Subtask<T> {
    task: Task,
    handle: JoinHandle<Result<T, Failure>>,
}

impl<T> Subtask<T> {
    /// The task the action runs under.
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Request cooperative cancellation of the action.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Block until the action returns (or is torn down) and surface its
    /// outcome. A panicking action yields [`FailureKind::RuntimePanic`].
    pub async fn wait(self) -> Result<T, Failure> {
        let outcome = match self.handle.await {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_cancelled() => Err(Failure::aborted()),
            Err(join_error) => Err(Failure::inconsistent(format!(
                "subtask join failed: {join_error}"
            ))),
        };
        let final_status = match &outcome {
            Err(failure) if failure.is(FailureKind::Aborted) => TaskStatus::Aborted,
            _ => TaskStatus::Done,
        };
        if !self.task.aborted() {
            *self.task.inner.status.lock() = final_status;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn subtask_runs_concurrently_and_returns_result() {
        let root = Task::new();
        assert_eq!(root.status(), TaskStatus::Ready);
        let subtask = root.start_in_subtask(|_task| async { Ok::<_, Failure>(41 + 1) });
        assert_eq!(subtask.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn abort_propagates_to_subtasks() {
        let root = Task::new();
        let subtask = root.start_in_subtask::<(), _, _>(|task| async move {
            loop {
                task.check_abort()?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        root.abort();
        let failure = subtask.wait().await.unwrap_err();
        assert!(failure.is(FailureKind::Aborted));
        assert_eq!(root.status(), TaskStatus::Aborted);
    }

    #[tokio::test]
    async fn failed_subtask_does_not_cancel_siblings() {
        let root = Task::new();
        let failing =
            root.start_in_subtask(|_task| async { Err::<(), _>(Failure::timeout("slow")) });
        let healthy = root.start_in_subtask(|task| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            task.check_abort()?;
            Ok::<_, Failure>("done")
        });
        assert!(failing.wait().await.is_err());
        assert_eq!(healthy.wait().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn panicking_action_surfaces_as_runtime_panic() {
        let root = Task::new();
        let subtask = root.start_in_subtask::<(), _, _>(|_task| async { panic!("broken action") });
        let failure = subtask.wait().await.unwrap_err();
        assert!(failure.is(FailureKind::RuntimePanic));
    }

    #[tokio::test]
    async fn task_identities_are_unique() {
        let root = Task::new();
        let child = root.child();
        assert_ne!(root.id(), child.id());
    }
}
