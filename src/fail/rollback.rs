//! Compensating-action stack for multi-step orchestrations.

use futures::future::BoxFuture;
use tracing::{error, info, warn};

use super::Failure;

type Compensation = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Failure>> + Send>;

/// A stack of named compensating actions.
///
/// Every irreversible step of an orchestration registers its inverse here.
/// When the orchestration fails, [`Rollback::unwind`] runs the inverses in
/// reverse order; each inverse's error is attached to the primary failure as
/// a consequence, never replacing it. On success (or when the caller wants to
/// keep partial resources for forensics) the stack is [disarmed]
/// (Rollback::disarm) and nothing runs.
#[derive(Default)]
pub struct Rollback {
    actions: Vec<(String, Compensation)>,
}

impl Rollback {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compensating action for a step that just succeeded.
    pub fn push<F, Fut>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Failure>> + Send + 'static,
    {
        self.actions
            .push((label.into(), Box::new(move || Box::pin(action()))));
    }

    /// Drop all registered actions without running them.
    pub fn disarm(&mut self) {
        self.actions.clear();
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when no action is registered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run the registered actions in reverse order, attaching their errors to
    /// `primary` as consequences, and return the enriched primary failure.
    pub async fn unwind(mut self, mut primary: Failure) -> Failure {
        for (label, action) in self.actions.drain(..).rev() {
            warn!(step = %label, "cleaning up on failure");
            match action().await {
                Ok(()) => info!(step = %label, "cleanup done"),
                Err(failure) => {
                    error!(step = %label, error = %failure, "cleanup failed");
                    primary.add_consequence(failure);
                }
            }
        }
        primary
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[tokio::test]
    async fn unwind_runs_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut rollback = Rollback::new();
        for step in ["first", "second", "third"] {
            let order = order.clone();
            rollback.push(step, move || async move {
                order.lock().push(step);
                Ok(())
            });
        }
        let primary = rollback.unwind(Failure::timeout("primary")).await;
        assert_eq!(*order.lock(), vec!["third", "second", "first"]);
        assert!(primary.consequences().is_empty());
    }

    #[tokio::test]
    async fn unwind_attaches_cleanup_errors_as_consequences() {
        let mut rollback = Rollback::new();
        rollback.push("delete network", || async { Ok(()) });
        rollback.push("delete vip", || async {
            Err(Failure::timeout("vip deletion timed out"))
        });
        let primary = rollback
            .unwind(Failure::not_found("gateway creation failed"))
            .await;
        assert_eq!(primary.message(), "gateway creation failed");
        assert_eq!(primary.consequences().len(), 1);
        assert_eq!(
            primary.consequences()[0].message(),
            "vip deletion timed out"
        );
    }

    #[tokio::test]
    async fn disarm_skips_every_action() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut rollback = Rollback::new();
        let seen = counter.clone();
        rollback.push("never runs", move || async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        rollback.disarm();
        assert!(rollback.is_empty());
        let _ = rollback.unwind(Failure::timeout("primary")).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
