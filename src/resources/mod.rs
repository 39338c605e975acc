//! Persistent resources and their orchestration.
//!
//! Every resource couples a [`core::Core`] (the generic persistent object)
//! with the [`crate::iaas::Service`] facade it drives. Resource methods
//! acquire the core's tasked lock, reload the latest revision from metadata
//! storage, call the provider, mutate the payload and write the result back;
//! failures trigger the compensating actions registered along the way.

pub mod core;
pub mod host;
pub mod network;

pub use self::core::{Core, ResourcePayload};
pub use host::{HOSTS_FOLDER, Host};
pub use network::{NETWORKS_FOLDER, Network};
