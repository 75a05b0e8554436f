//! Stack outputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output name of the reserved (elastic) address.
pub const SALT_MASTER_EIP: &str = "saltMasterEip";

/// Output name of the instance's own public address.
pub const SALT_MASTER_IP: &str = "saltMasterIp";

/// Errors raised when exporting outputs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    /// The output was already exported during this run.
    #[error("output '{0}' already exported")]
    AlreadyExported(String),
}

/// Write-once registry of named outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputRegistry {
    values: BTreeMap<String, String>,
}

impl OutputRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Export a value under `name`.
    ///
    /// # Errors
    /// Returns [`OutputError::AlreadyExported`] if `name` is already set.
    pub fn export(&mut self, name: &str, value: impl Into<String>) -> Result<(), OutputError> {
        if self.values.contains_key(name) {
            return Err(OutputError::AlreadyExported(name.to_string()));
        }
        self.values.insert(name.to_string(), value.into());
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Final addresses of a provisioned salt master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningResult {
    /// Reserved address bound to the instance.
    pub salt_master_eip: String,
    /// Address the provider assigned to the instance.
    pub salt_master_ip: String,
}

impl ProvisioningResult {
    /// Export both addresses under their well-known names.
    ///
    /// # Errors
    /// Returns [`OutputError`] if either name was already exported.
    pub fn publish(&self, registry: &mut OutputRegistry) -> Result<(), OutputError> {
        registry.export(SALT_MASTER_EIP, &self.salt_master_eip)?;
        registry.export(SALT_MASTER_IP, &self.salt_master_ip)?;
        Ok(())
    }
}
