//! Concurrency primitives for the orchestration core.
//!
//! - [`Task`]: hierarchical cancelable unit of work; its identity is the key
//!   under which [`TaskedLock`] recognises reentrancy.
//! - [`TaskedLock`]: reader/writer lock keyed by task identity.
//! - [`Shielded`]: cloneable payload guarded by a tasked lock, mutated
//!   through clone-and-commit callbacks.
//! - [`Properties`]: versioned named extensions of a resource payload, one
//!   guarded entry per property key.

mod properties;
mod shielded;
mod task;
mod tasked_lock;

pub use properties::{Properties, Property};
pub use shielded::Shielded;
pub use task::{Subtask, Task, TaskId, TaskStatus};
pub use tasked_lock::TaskedLock;
