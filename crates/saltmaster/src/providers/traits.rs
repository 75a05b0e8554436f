//! Provider traits and common types for the resources a salt master needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{BillingCycle, Facility, OperatingSystem, Plan};

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation timed out.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Resource entered a terminal failure state.
    #[error("Resource failed: {0}")]
    ResourceFailed(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether the same request may succeed if sent again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Randomly generated token shared by Teleport auth peers.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerToken(String);

impl PeerToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PeerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PeerToken(***)")
    }
}

/// A reserved public address block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedAddress {
    /// Reservation identifier.
    pub id: String,
    /// First usable address of the block (e.g. `147.75.1.2`).
    pub address: String,
    /// Block in CIDR notation (e.g. `147.75.1.2/32`).
    pub cidr_notation: String,
    /// Facility the block was reserved in.
    pub facility: String,
}

/// A compute instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique instance identifier.
    pub id: String,
    /// Instance hostname.
    pub hostname: String,
    /// Provider state (e.g. `active`).
    pub state: String,
    /// Public IPv4 assigned by the provider at boot.
    pub public_ipv4: Option<String>,
}

impl Instance {
    /// Whether the instance has finished provisioning.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == "active"
    }
}

/// Binding of a reserved address to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAttachment {
    /// Assignment identifier.
    pub id: String,
    /// Instance the address is bound to.
    pub instance_id: String,
    /// Bound block in CIDR notation.
    pub cidr_notation: String,
}

/// A DNS record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Record identifier.
    pub id: String,
    /// Zone the record lives in.
    pub zone: String,
    /// Fully qualified record name.
    pub domain: String,
    /// Record type (e.g. `A`).
    pub record_type: String,
    /// Answers returned for the record.
    pub answers: Vec<String>,
}

/// Request to reserve an address block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveAddressRequest {
    /// Facility to reserve in.
    pub facility: Facility,
    /// Number of addresses in the block.
    pub quantity: u32,
}

/// Request to create a compute instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    /// Hostname for the instance.
    pub hostname: String,
    /// Hardware plan.
    pub plan: Plan,
    /// Facilities the instance may be placed in.
    pub facilities: Vec<Facility>,
    /// Operating system image.
    pub operating_system: OperatingSystem,
    /// Tags attached to the instance.
    pub tags: Vec<String>,
    /// Billing cycle.
    pub billing_cycle: BillingCycle,
    /// Boot-time configuration payload.
    pub user_data: String,
}

/// Request to bind a reserved address to an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachAddressRequest {
    /// Instance to bind to.
    pub instance_id: String,
    /// Block in CIDR notation.
    pub cidr_notation: String,
    /// Delete any previous binding of the same role before creating this one.
    pub delete_before_replace: bool,
}

/// Request to create or update a DNS record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecordRequest {
    /// Zone the record lives in.
    pub zone: String,
    /// Fully qualified record name.
    pub domain: String,
    /// Record type.
    pub record_type: String,
    /// Answers for the record.
    pub answers: Vec<String>,
}

/// Compute and address operations of a bare metal cloud.
#[async_trait]
pub trait MetalProvider: Send + Sync {
    /// Reserve a public address block.
    async fn reserve_address(
        &self,
        req: ReserveAddressRequest,
    ) -> Result<ReservedAddress, ProviderError>;

    /// Create an instance. Returns once the provider has accepted it, usually
    /// before it is active.
    async fn create_instance(&self, req: CreateInstanceRequest) -> Result<Instance, ProviderError>;

    /// Wait until an instance is active and has its public address.
    async fn wait_active(&self, id: &str) -> Result<Instance, ProviderError>;

    /// Bind a reserved address to an instance.
    async fn attach_address(&self, req: AttachAddressRequest)
        -> Result<IpAttachment, ProviderError>;

    /// Remove an address binding.
    async fn detach_address(&self, attachment_id: &str) -> Result<(), ProviderError>;

    /// Delete an instance.
    async fn delete_instance(&self, id: &str) -> Result<(), ProviderError>;

    /// Release a reserved address block.
    async fn release_address(&self, id: &str) -> Result<(), ProviderError>;
}

/// Managed DNS operations.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create the record, or update it in place if it already exists.
    async fn upsert_record(&self, req: CreateRecordRequest) -> Result<DnsRecord, ProviderError>;
}

/// Source of random peer tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Generate a fresh token.
    async fn generate_token(&self) -> Result<PeerToken, ProviderError>;
}
