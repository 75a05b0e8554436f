//! Equinix Metal API request and response models.

use serde::{Deserialize, Serialize};

// ============================================================================
// IP reservations and assignments
// ============================================================================

/// Request body for reserving an IP block.
#[derive(Debug, Serialize)]
pub struct ReserveIpBody {
    /// Reservation type (`public_ipv4`).
    #[serde(rename = "type")]
    pub reservation_type: String,
    /// Number of addresses.
    pub quantity: u32,
    /// Facility code.
    pub facility: String,
}

/// IP reservation or assignment returned by the API.
#[derive(Debug, Deserialize)]
pub struct IpAddressResource {
    /// Reservation/assignment ID.
    pub id: String,
    /// First address of the block.
    pub address: String,
    /// Network address of the block.
    pub network: String,
    /// Prefix length.
    pub cidr: u8,
    /// Address family (4 or 6).
    pub address_family: Option<u8>,
    /// Whether the block is publicly routable.
    pub public: Option<bool>,
    /// Whether this is the management address of a device.
    pub management: Option<bool>,
    /// Facility the block lives in.
    pub facility: Option<FacilityRef>,
}

impl IpAddressResource {
    /// Block in CIDR notation.
    #[must_use]
    pub fn cidr_notation(&self) -> String {
        format!("{}/{}", self.network, self.cidr)
    }
}

/// Facility reference.
#[derive(Debug, Deserialize)]
pub struct FacilityRef {
    /// Facility code (e.g. `am6`).
    pub code: String,
}

/// Request body for assigning an address to a device.
#[derive(Debug, Serialize)]
pub struct AssignIpBody {
    /// Block in CIDR notation.
    pub address: String,
}

// ============================================================================
// Devices
// ============================================================================

/// Request body for creating a device.
#[derive(Debug, Serialize)]
pub struct CreateDeviceBody {
    pub hostname: String,
    pub plan: String,
    pub facility: Vec<String>,
    pub operating_system: String,
    pub billing_cycle: String,
    pub tags: Vec<String>,
    pub userdata: String,
}

/// Device returned by the API.
#[derive(Debug, Deserialize)]
pub struct DeviceResource {
    /// Device ID.
    pub id: String,
    /// Device hostname.
    pub hostname: String,
    /// Provisioning state (`queued`, `provisioning`, `active`, `failed`, ...).
    pub state: String,
    /// Addresses assigned to the device.
    #[serde(default)]
    pub ip_addresses: Vec<IpAddressResource>,
}

impl DeviceResource {
    /// The device's own public IPv4 address.
    #[must_use]
    pub fn public_ipv4(&self) -> Option<String> {
        self.ip_addresses
            .iter()
            .find(|ip| {
                ip.address_family == Some(4)
                    && ip.public.unwrap_or(false)
                    && ip.management.unwrap_or(true)
            })
            .map(|ip| ip.address.clone())
    }
}

/// API error body.
#[derive(Debug, Deserialize)]
pub struct ApiError {
    /// Error messages.
    #[serde(default)]
    pub errors: Vec<String>,
}
