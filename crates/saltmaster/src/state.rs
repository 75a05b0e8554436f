//! Stack state persistence.
//!
//! Every resource a run creates is recorded here together with a
//! fingerprint of the inputs it was created from. A later run against the
//! same stack reuses recorded resources whose inputs are unchanged instead
//! of creating duplicates, and replaces the ones whose inputs changed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::info;

use crate::config::validate_stack_name;
use crate::outputs::OutputRegistry;
use crate::providers::{DnsRecord, Instance, IpAttachment, PeerToken, ReservedAddress};

/// A resource together with the fingerprint of its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recorded<T> {
    /// SHA-1 of the serialized inputs.
    pub fingerprint: String,
    pub resource: T,
}

impl<T> Recorded<T> {
    #[must_use]
    pub fn new(fingerprint: impl Into<String>, resource: T) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            resource,
        }
    }

    /// The resource, if it was created from inputs with this fingerprint.
    #[must_use]
    pub fn matching(&self, fingerprint: &str) -> Option<&T> {
        (self.fingerprint == fingerprint).then_some(&self.resource)
    }
}

/// A superseded resource waiting to be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Retired {
    Instance(String),
    Address(String),
}

/// Resources and outputs of one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackState {
    /// Stack name.
    pub name: String,
    /// Teleport peer token generated by the first run.
    pub peer_token: Option<PeerToken>,
    pub reserved_address: Option<Recorded<ReservedAddress>>,
    pub instance: Option<Recorded<Instance>>,
    pub attachment: Option<Recorded<IpAttachment>>,
    pub dns_record: Option<Recorded<DnsRecord>>,
    /// Resources replaced by a newer run and not yet deleted.
    #[serde(default)]
    pub retired: Vec<Retired>,
    /// Outputs of the last successful run.
    #[serde(default)]
    pub outputs: OutputRegistry,
    /// Timestamp of last update.
    pub updated_at: String,
    /// Directory the state is persisted in; `None` keeps it in memory.
    #[serde(skip)]
    state_dir: Option<PathBuf>,
}

impl StackState {
    /// Create an empty state persisted under `state_dir`.
    #[must_use]
    pub fn new(name: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: Some(state_dir.into()),
            ..Self::ephemeral(name)
        }
    }

    /// Create an empty state that is never written to disk.
    #[must_use]
    pub fn ephemeral(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            peer_token: None,
            reserved_address: None,
            instance: None,
            attachment: None,
            dns_record: None,
            retired: Vec::new(),
            outputs: OutputRegistry::new(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            state_dir: None,
        }
    }

    /// Get the state file path.
    #[must_use]
    pub fn state_file(state_dir: &Path, name: &str) -> PathBuf {
        state_dir.join(format!("{name}.json"))
    }

    /// Load state from file.
    ///
    /// # Errors
    /// Returns an error if `name` is not a valid stack name, or if the file
    /// cannot be read or parsed.
    pub fn load(state_dir: &Path, name: &str) -> Result<Option<Self>> {
        validate_stack_name(name)?;
        let path = Self::state_file(state_dir, name);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        let mut state: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file {}", path.display()))?;
        state.state_dir = Some(state_dir.to_path_buf());

        info!(stack = %state.name, "Loaded stack state");
        Ok(Some(state))
    }

    /// Load state from file, or start a new one.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_new(state_dir: &Path, name: &str) -> Result<Self> {
        Ok(Self::load(state_dir, name)?.unwrap_or_else(|| Self::new(name, state_dir)))
    }

    /// Save state to file. A no-op for ephemeral state.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self) -> Result<()> {
        self.updated_at = chrono::Utc::now().to_rfc3339();

        let Some(state_dir) = &self.state_dir else {
            return Ok(());
        };

        std::fs::create_dir_all(state_dir).context("Failed to create state directory")?;

        let path = Self::state_file(state_dir, &self.name);
        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write state file {}", path.display()))?;

        Ok(())
    }

    /// Queue a superseded resource for deletion.
    pub fn retire(&mut self, resource: Retired) {
        if !self.retired.contains(&resource) {
            self.retired.push(resource);
        }
    }
}

/// Fingerprint of the inputs a resource is created from.
///
/// # Errors
/// Returns an error if the inputs cannot be serialized.
pub fn fingerprint<T: Serialize>(inputs: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(inputs)?;
    Ok(hex::encode(Sha1::digest(&bytes)))
}
