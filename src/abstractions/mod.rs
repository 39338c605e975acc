//! Provider-neutral resource payloads.
//!
//! These types are the at-rest model of the core: what gets pinned into a
//! persistent object, serialised into the metadata folders and exchanged
//! with provider drivers. They carry no behaviour beyond identity, cloning
//! and serialisation; orchestration lives in [`crate::resources`].

mod host;
mod network;
mod properties_v1;

pub use host::{
    HostCore, HostRequest, HostTemplate, Image, KeyPair, SizingRequirements, SshConfig,
};
pub use network::{
    IpVersion, Network, NetworkRequest, NetworkState, SubNetwork, VirtualIp, cidr_is_routable,
};
pub use properties_v1::{HostNetworking, NetworkHosts};

/// A payload with a provider-assigned id and a user-facing name.
pub trait Identifiable {
    /// Provider-assigned resource id.
    fn id(&self) -> &str;
    /// User-facing resource name.
    fn name(&self) -> &str;
}
