//! Larch: vendor-neutral resource orchestration core.
//!
//! Larch composes heterogeneous IaaS primitives into higher-level safe
//! abstractions: networks with gateways, hosts, attached resources. Resource
//! metadata is persisted out-of-band in object storage under dual by-id /
//! by-name indices; every mutation runs under a task-keyed reader/writer
//! lock, reloads the latest stored revision before touching it, and writes
//! both indices back before releasing. Multi-step creations register
//! compensating actions that unwind in reverse on failure, with cleanup
//! errors recorded as consequences of the primary failure.
//!
//! The crate is the orchestration core only: the RPC/CLI surface, the
//! per-cloud driver implementations, the userdata template generator and the
//! SSH runner are external collaborators reached through the contracts in
//! [`iaas`] and [`userdata`].

#![warn(missing_docs)]

pub mod abstractions;
pub mod concurrency;
pub mod fail;
pub mod iaas;
pub mod metadata;
pub mod objectstorage;
pub mod protocol;
pub mod resources;
pub mod retry;
pub mod testing;
pub mod userdata;

pub use abstractions::Identifiable;
pub use concurrency::{Task, TaskStatus};
pub use fail::{Failure, FailureKind};
pub use iaas::Service;
pub use resources::{Host, Network};
