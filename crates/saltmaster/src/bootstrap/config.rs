//! Bootstrap payload inputs.

use serde::Serialize;

use crate::config::ProvisioningRequest;
use crate::providers::PeerToken;

/// Domain the Teleport proxy is published under for a zone.
#[must_use]
pub fn teleport_domain(zone: &str) -> String {
    format!("teleport.{}", zone.trim_end_matches('.'))
}

/// Every value the bootstrap payload is rendered from.
///
/// Only [`BootstrapConfigBuilder::peer_token`] produces one, so a config
/// without a resolved token cannot exist.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapConfig {
    teleport_domain: String,
    teleport_client_id: String,
    teleport_client_secret: String,
    teleport_peer_token: String,
    github_username: String,
    github_access_token: String,
    storage_bucket_name: String,
    storage_bucket_location: String,
    storage_access_key_id: String,
    storage_secret_access_key: String,
}

impl BootstrapConfig {
    /// Start a config from the values known before the run begins.
    #[must_use]
    pub fn builder(request: &ProvisioningRequest) -> BootstrapConfigBuilder {
        BootstrapConfigBuilder::new(request)
    }

    #[must_use]
    pub fn teleport_domain(&self) -> &str {
        &self.teleport_domain
    }

    #[must_use]
    pub fn teleport_peer_token(&self) -> &str {
        &self.teleport_peer_token
    }
}

impl std::fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("teleport_domain", &self.teleport_domain)
            .field("teleport_client_id", &self.teleport_client_id)
            .field("github_username", &self.github_username)
            .field("storage_bucket_name", &self.storage_bucket_name)
            .field("storage_bucket_location", &self.storage_bucket_location)
            .finish_non_exhaustive()
    }
}

/// Static half of a [`BootstrapConfig`], waiting for the peer token.
#[derive(Clone)]
pub struct BootstrapConfigBuilder {
    teleport_domain: String,
    teleport_client_id: String,
    teleport_client_secret: String,
    github_username: String,
    github_access_token: String,
    storage_bucket_name: String,
    storage_bucket_location: String,
    storage_access_key_id: String,
    storage_secret_access_key: String,
}

impl BootstrapConfigBuilder {
    /// Capture the static fields of a request.
    #[must_use]
    pub fn new(request: &ProvisioningRequest) -> Self {
        Self {
            teleport_domain: teleport_domain(&request.zone),
            teleport_client_id: request.teleport.client_id.clone(),
            teleport_client_secret: request.teleport.client_secret.clone(),
            github_username: request.github.username.clone(),
            github_access_token: request.github.access_token.clone(),
            storage_bucket_name: request.storage.bucket_name.clone(),
            storage_bucket_location: request.storage.bucket_location.clone(),
            storage_access_key_id: request.storage.access_key_id.clone(),
            storage_secret_access_key: request.storage.secret_access_key.clone(),
        }
    }

    /// Domain the config will carry.
    #[must_use]
    pub fn teleport_domain(&self) -> &str {
        &self.teleport_domain
    }

    /// Set the last field and freeze the config.
    #[must_use]
    pub fn peer_token(self, token: &PeerToken) -> BootstrapConfig {
        BootstrapConfig {
            teleport_domain: self.teleport_domain,
            teleport_client_id: self.teleport_client_id,
            teleport_client_secret: self.teleport_client_secret,
            teleport_peer_token: token.as_str().to_string(),
            github_username: self.github_username,
            github_access_token: self.github_access_token,
            storage_bucket_name: self.storage_bucket_name,
            storage_bucket_location: self.storage_bucket_location,
            storage_access_key_id: self.storage_access_key_id,
            storage_secret_access_key: self.storage_secret_access_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;

    #[test]
    fn test_teleport_domain() {
        assert_eq!(teleport_domain("example.com"), "teleport.example.com");
        assert_eq!(teleport_domain("example.com."), "teleport.example.com");
    }

    #[test]
    fn test_builder_sets_token_last() {
        let request = ProvisioningRequest::from_yaml(SAMPLE).unwrap();
        let builder = BootstrapConfig::builder(&request);
        assert_eq!(builder.teleport_domain(), "teleport.example.com");

        let config = builder.peer_token(&PeerToken::new("deadbeef"));
        assert_eq!(config.teleport_peer_token(), "deadbeef");
        assert_eq!(config.teleport_domain(), "teleport.example.com");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let request = ProvisioningRequest::from_yaml(SAMPLE).unwrap();
        let config = BootstrapConfig::builder(&request).peer_token(&PeerToken::new("deadbeef"));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("deadbeef"));
        assert!(!rendered.contains("ghp_example"));
    }
}
