//! Stack configuration for a salt master run.
//!
//! The stack file is YAML and mirrors the settings the run needs up front:
//! the Equinix Metal project, the DNS zone, the salt master's placement, and
//! the Teleport, GitHub and storage credentials baked into the bootstrap
//! payload. Everything is validated here so the orchestrator never sees a
//! half-populated request.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a stack file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required field is absent or empty.
    #[error("missing required field: {field}")]
    Missing { field: &'static str },

    /// A field is present but unusable.
    #[error("invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    /// The stack file could not be read.
    #[error("failed to read stack file: {0}")]
    Io(#[from] std::io::Error),

    /// The stack file is not valid YAML or has an unexpected shape.
    #[error("failed to parse stack file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Equinix Metal facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facility {
    Am6,
    Ams1,
    Ch3,
    Da11,
    Dc13,
    Fr2,
    La4,
    Ny5,
    Sjc1,
    Sv15,
    Sy4,
    Tr2,
}

impl Facility {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Am6 => "am6",
            Self::Ams1 => "ams1",
            Self::Ch3 => "ch3",
            Self::Da11 => "da11",
            Self::Dc13 => "dc13",
            Self::Fr2 => "fr2",
            Self::La4 => "la4",
            Self::Ny5 => "ny5",
            Self::Sjc1 => "sjc1",
            Self::Sv15 => "sv15",
            Self::Sy4 => "sy4",
            Self::Tr2 => "tr2",
        }
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equinix Metal hardware plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Plan {
    #[serde(rename = "c3.small.x86")]
    C3SmallX86,
    #[serde(rename = "c3.medium.x86")]
    C3MediumX86,
    #[serde(rename = "m3.small.x86")]
    M3SmallX86,
    #[serde(rename = "m3.large.x86")]
    M3LargeX86,
    #[serde(rename = "s3.xlarge.x86")]
    S3XlargeX86,
    #[serde(rename = "n3.xlarge.x86")]
    N3XlargeX86,
    #[serde(rename = "c3.large.arm64")]
    C3LargeArm64,
}

impl Plan {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::C3SmallX86 => "c3.small.x86",
            Self::C3MediumX86 => "c3.medium.x86",
            Self::M3SmallX86 => "m3.small.x86",
            Self::M3LargeX86 => "m3.large.x86",
            Self::S3XlargeX86 => "s3.xlarge.x86",
            Self::N3XlargeX86 => "n3.xlarge.x86",
            Self::C3LargeArm64 => "c3.large.arm64",
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating system image slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingSystem {
    #[serde(rename = "ubuntu_20_04")]
    Ubuntu2004,
}

impl OperatingSystem {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ubuntu2004 => "ubuntu_20_04",
        }
    }
}

/// Billing cycle for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Hourly,
    Monthly,
}

impl BillingCycle {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Monthly => "monthly",
        }
    }
}

/// Placement of the salt master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaltMasterConfig {
    pub facility: Facility,
    pub plan: Plan,
}

/// Teleport GitHub SSO client credentials.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeleportConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// GitHub identity used to pull salt states.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubConfig {
    pub username: String,
    pub access_token: String,
}

/// S3-compatible bucket for Teleport session storage.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub bucket_location: String,
}

macro_rules! redacted_debug {
    ($ty:ident { $($shown:ident),* ; $($hidden:ident),* }) => {
        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    $(.field(stringify!($shown), &self.$shown))*
                    $(.field(stringify!($hidden), &"***"))*
                    .finish()
            }
        }
    };
}

redacted_debug!(TeleportConfig { client_id ; client_secret });
redacted_debug!(GitHubConfig { username ; access_token });
redacted_debug!(StorageConfig { bucket_name, bucket_location ; access_key_id, secret_access_key });

/// Everything a provisioning run needs, loaded and validated before the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequest {
    /// Stack (environment) name; prefixes the instance hostname.
    pub stack: String,
    /// Equinix Metal project.
    pub project_id: String,
    /// DNS zone the Teleport record is published in.
    pub zone: String,
    pub salt_master: SaltMasterConfig,
    pub teleport: TeleportConfig,
    pub github: GitHubConfig,
    #[serde(alias = "aws")]
    pub storage: StorageConfig,
}

impl ProvisioningRequest {
    /// Parse a request from YAML and validate it.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the YAML is malformed or a field is missing.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let request: Self = serde_yaml::from_str(yaml)?;
        request.validate()?;
        Ok(request)
    }

    /// Replace the stack name, e.g. from a command line override.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    /// Hostname of the salt master instance.
    #[must_use]
    pub fn hostname(&self) -> String {
        format!("{}-salt-master", self.stack)
    }

    /// Check that every required field carries a value.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] for the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required: [(&'static str, &str); 11] = [
            ("stack", &self.stack),
            ("projectId", &self.project_id),
            ("zone", &self.zone),
            ("teleport.clientId", &self.teleport.client_id),
            ("teleport.clientSecret", &self.teleport.client_secret),
            ("github.username", &self.github.username),
            ("github.accessToken", &self.github.access_token),
            ("storage.accessKeyId", &self.storage.access_key_id),
            ("storage.secretAccessKey", &self.storage.secret_access_key),
            ("storage.bucketName", &self.storage.bucket_name),
            ("storage.bucketLocation", &self.storage.bucket_location),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing { field });
            }
        }

        validate_stack_name(&self.stack)?;

        if self.zone.trim_end_matches('.').contains(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                field: "zone",
                message: format!("'{}' is not a DNS name", self.zone),
            });
        }

        Ok(())
    }
}

/// Longest stack name whose `{stack}-salt-master` hostname fits in one DNS label.
const MAX_STACK_NAME_LEN: usize = 63 - "-salt-master".len();

/// Check that `name` can prefix a hostname and name a state file.
///
/// Stack names are lowercase DNS labels: ASCII letters, digits and `-`,
/// neither starting nor ending with `-`.
///
/// # Errors
/// Returns [`ConfigError::Invalid`] for any other name.
pub fn validate_stack_name(name: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        field: "stack",
        message: format!("'{name}' {reason}"),
    };

    if name.is_empty() {
        return Err(ConfigError::Missing { field: "stack" });
    }
    if name.len() > MAX_STACK_NAME_LEN {
        return Err(invalid(&format!(
            "is longer than {MAX_STACK_NAME_LEN} characters"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(invalid("may only contain lowercase letters, digits and '-'"));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("may not start or end with '-'"));
    }
    Ok(())
}

/// Load and validate a stack file.
///
/// # Errors
/// Returns [`ConfigError`] if the file cannot be read, parsed, or validated.
pub fn load(path: &Path) -> Result<ProvisioningRequest, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    ProvisioningRequest::from_yaml(&content)
}
