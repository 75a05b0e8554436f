//! Provider abstractions for the salt master's cloud resources.

pub mod equinix;
pub mod ns1;
pub mod random;
mod traits;

pub use traits::{
    AttachAddressRequest, CreateInstanceRequest, CreateRecordRequest, DnsProvider, DnsRecord,
    Instance, IpAttachment, MetalProvider, PeerToken, ProviderError, ReserveAddressRequest,
    ReservedAddress, TokenSource,
};
