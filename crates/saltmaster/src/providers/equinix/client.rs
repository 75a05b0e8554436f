//! Equinix Metal API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use super::models::{
    ApiError, AssignIpBody, CreateDeviceBody, DeviceResource, IpAddressResource, ReserveIpBody,
};
use crate::providers::traits::{
    AttachAddressRequest, CreateInstanceRequest, Instance, IpAttachment, MetalProvider,
    ProviderError, ReserveAddressRequest, ReservedAddress,
};

/// Base URL for the Equinix Metal API.
const API_BASE_URL: &str = "https://api.equinix.com/metal/v1";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Polling interval when waiting for a device to become active.
const POLL_INTERVAL_SECS: u64 = 10;

/// How long a device may take to become active.
const DEFAULT_PROVISION_TIMEOUT_SECS: u64 = 1800;

/// Consecutive transient polling errors tolerated before giving up.
const MAX_POLL_ERRORS: u32 = 5;

/// Equinix Metal provider.
#[derive(Clone)]
pub struct EquinixMetal {
    /// HTTP client.
    client: Client,
    /// API token for authentication.
    auth_token: String,
    /// Project resources are created in.
    project_id: String,
    /// API base URL.
    base_url: String,
    /// Interval between device state polls.
    poll_interval: Duration,
    /// Maximum time to wait for a device to become active.
    provision_timeout_secs: u64,
}

impl EquinixMetal {
    /// Create a new Equinix Metal provider.
    ///
    /// # Arguments
    /// * `auth_token` - Equinix Metal API token
    /// * `project_id` - Project ID for resource operations
    ///
    /// # Errors
    /// Returns error if the token is empty or the HTTP client cannot be created.
    pub fn new(
        auth_token: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let auth_token = auth_token.into();
        if auth_token.is_empty() {
            return Err(ProviderError::Config("Equinix Metal auth token is empty".into()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            auth_token,
            project_id: project_id.into(),
            base_url: API_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            provision_timeout_secs: DEFAULT_PROVISION_TIMEOUT_SECS,
        })
    }

    /// Point the client at a different API endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Change how often device state is polled.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Change how long to wait for a device to become active.
    #[must_use]
    pub fn with_provision_timeout(mut self, timeout_secs: u64) -> Self {
        self.provision_timeout_secs = timeout_secs;
        self
    }

    /// Make an authenticated GET request.
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(&url)
            .header("X-Auth-Token", &self.auth_token)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated POST request.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "POST request");

        let response = self
            .client
            .post(&url)
            .header("X-Auth-Token", &self.auth_token)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated DELETE request. A missing resource counts as deleted.
    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "DELETE request");

        let response = self
            .client
            .delete(&url)
            .header("X-Auth-Token", &self.auth_token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: Self::error_message(text),
            })
        }
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, "Failed to parse response");
                ProviderError::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(ProviderError::NotFound(text))
        } else {
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: Self::error_message(text),
            })
        }
    }

    /// Flatten the API's `errors` array, falling back to the raw body.
    fn error_message(body: String) -> String {
        match serde_json::from_str::<ApiError>(&body) {
            Ok(err) if !err.errors.is_empty() => err.errors.join("; "),
            _ => body,
        }
    }

    /// Convert an API device to our Instance type.
    fn to_instance(device: &DeviceResource) -> Instance {
        Instance {
            id: device.id.clone(),
            hostname: device.hostname.clone(),
            state: device.state.clone(),
            public_ipv4: device.public_ipv4(),
        }
    }
}

#[async_trait]
impl MetalProvider for EquinixMetal {
    async fn reserve_address(
        &self,
        req: ReserveAddressRequest,
    ) -> Result<ReservedAddress, ProviderError> {
        info!(facility = %req.facility, quantity = req.quantity, "Reserving IP block");

        let body = ReserveIpBody {
            reservation_type: "public_ipv4".to_string(),
            quantity: req.quantity,
            facility: req.facility.as_str().to_string(),
        };

        let ip: IpAddressResource = self
            .post(&format!("/projects/{}/ips", self.project_id), &body)
            .await?;

        Ok(ReservedAddress {
            cidr_notation: ip.cidr_notation(),
            facility: ip
                .facility
                .map_or_else(|| req.facility.as_str().to_string(), |f| f.code),
            id: ip.id,
            address: ip.address,
        })
    }

    async fn create_instance(&self, req: CreateInstanceRequest) -> Result<Instance, ProviderError> {
        info!(
            hostname = %req.hostname,
            plan = %req.plan,
            "Creating device"
        );

        let body = CreateDeviceBody {
            hostname: req.hostname,
            plan: req.plan.as_str().to_string(),
            facility: req
                .facilities
                .iter()
                .map(|f| f.as_str().to_string())
                .collect(),
            operating_system: req.operating_system.as_str().to_string(),
            billing_cycle: req.billing_cycle.as_str().to_string(),
            tags: req.tags,
            userdata: req.user_data,
        };

        let device: DeviceResource = self
            .post(&format!("/projects/{}/devices", self.project_id), &body)
            .await?;
        info!(device_id = %device.id, state = %device.state, "Device created");

        Ok(Self::to_instance(&device))
    }

    async fn wait_active(&self, id: &str) -> Result<Instance, ProviderError> {
        info!(device_id = %id, timeout_secs = self.provision_timeout_secs, "Waiting for device to become active");

        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(self.provision_timeout_secs);
        let mut poll_errors = 0;

        loop {
            match self.get::<DeviceResource>(&format!("/devices/{id}")).await {
                Ok(device) => {
                    poll_errors = 0;
                    debug!(
                        device_id = %id,
                        state = %device.state,
                        elapsed_secs = start.elapsed().as_secs(),
                        "Polling device state"
                    );

                    match device.state.as_str() {
                        "active" => {
                            info!(device_id = %id, "Device is active");
                            return Ok(Self::to_instance(&device));
                        }
                        "failed" => {
                            return Err(ProviderError::ResourceFailed(format!(
                                "device {id} failed to provision"
                            )));
                        }
                        _ => {}
                    }
                }
                Err(e) if e.is_transient() && poll_errors < MAX_POLL_ERRORS => {
                    poll_errors += 1;
                    warn!(device_id = %id, error = %e, attempt = poll_errors, "Device poll failed, retrying");
                }
                Err(e) => return Err(e),
            }

            if start.elapsed() > timeout {
                return Err(ProviderError::Timeout(self.provision_timeout_secs));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn attach_address(
        &self,
        req: AttachAddressRequest,
    ) -> Result<IpAttachment, ProviderError> {
        info!(
            device_id = %req.instance_id,
            address = %req.cidr_notation,
            "Assigning IP block"
        );

        let body = AssignIpBody {
            address: req.cidr_notation.clone(),
        };
        let ip: IpAddressResource = self
            .post(&format!("/devices/{}/ips", req.instance_id), &body)
            .await?;

        Ok(IpAttachment {
            id: ip.id,
            instance_id: req.instance_id,
            cidr_notation: req.cidr_notation,
        })
    }

    async fn detach_address(&self, attachment_id: &str) -> Result<(), ProviderError> {
        info!(assignment_id = %attachment_id, "Removing IP assignment");
        self.delete(&format!("/ips/{attachment_id}")).await
    }

    async fn delete_instance(&self, id: &str) -> Result<(), ProviderError> {
        info!(device_id = %id, "Deleting device");
        self.delete(&format!("/devices/{id}")).await?;
        info!(device_id = %id, "Device deleted");
        Ok(())
    }

    async fn release_address(&self, id: &str) -> Result<(), ProviderError> {
        info!(reservation_id = %id, "Releasing IP reservation");
        self.delete(&format!("/ips/{id}")).await
    }
}
