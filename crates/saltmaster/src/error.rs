//! Error types for a provisioning run.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::providers::ProviderError;

/// Steps of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Reserve the public address block.
    ReserveAddress,
    /// Obtain the Teleport peer token.
    PeerToken,
    /// Render the bootstrap payload.
    ComposeBootstrap,
    /// Create the salt master instance.
    CreateInstance,
    /// Bind the reserved address to the instance.
    AttachAddress,
    /// Publish the Teleport DNS record.
    DnsRecord,
    /// Export the run's outputs.
    PublishResult,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReserveAddress => write!(f, "address reservation"),
            Self::PeerToken => write!(f, "peer token generation"),
            Self::ComposeBootstrap => write!(f, "bootstrap composition"),
            Self::CreateInstance => write!(f, "instance creation"),
            Self::AttachAddress => write!(f, "address attachment"),
            Self::DnsRecord => write!(f, "dns record creation"),
            Self::PublishResult => write!(f, "result publication"),
        }
    }
}

/// Why a step produced no value.
#[derive(Error, Debug, Clone)]
pub enum StepCause {
    /// A remote call failed.
    #[error(transparent)]
    Provider(Arc<ProviderError>),

    /// The bootstrap payload could not be rendered.
    #[error("{0}")]
    Compose(String),

    /// An output could not be exported.
    #[error("{0}")]
    Output(String),

    /// The stack state could not be persisted after the step.
    #[error("state: {0}")]
    State(String),

    /// The task running the step panicked or was aborted.
    #[error("task aborted: {0}")]
    Aborted(String),

    /// The step was skipped because another step failed first.
    #[error("skipped after an earlier failure")]
    Cancelled,
}

impl From<ProviderError> for StepCause {
    fn from(err: ProviderError) -> Self {
        Self::Provider(Arc::new(err))
    }
}

/// A step that did not complete, and why.
#[derive(Error, Debug, Clone)]
#[error("{step} failed: {cause}")]
pub struct StepFailure {
    pub step: Step,
    #[source]
    pub cause: StepCause,
}

impl StepFailure {
    #[must_use]
    pub fn new(step: Step, cause: impl Into<StepCause>) -> Self {
        Self {
            step,
            cause: cause.into(),
        }
    }

    /// Whether the step was skipped rather than attempted.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, StepCause::Cancelled)
    }

    /// The provider error behind this failure, if any.
    #[must_use]
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match &self.cause {
            StepCause::Provider(err) => Some(&**err),
            _ => None,
        }
    }
}

/// Errors returned from a provisioning run.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The request was rejected before any remote call.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The first step that failed.
    #[error(transparent)]
    Step(#[from] StepFailure),

    /// The stack state could not be read or written.
    #[error(transparent)]
    State(#[from] anyhow::Error),
}

impl ProvisionError {
    /// The failed step, for step failures.
    #[must_use]
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Step(failure) => Some(failure.step),
            _ => None,
        }
    }
}
