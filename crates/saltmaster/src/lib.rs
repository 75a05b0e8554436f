//! Salt master provisioning for the Tinkerbell infrastructure.
//!
//! This crate provisions a SaltStack master on Equinix Metal: it reserves a
//! public address, generates a Teleport peer token, renders a cloud-init
//! payload from the stack's credentials and that token, boots the instance,
//! binds the address to it, and publishes `teleport.<zone>` in NS1.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use saltmaster::providers::{equinix::EquinixMetal, ns1::Ns1, random::UuidTokenSource};
//! use saltmaster::{config, Orchestrator, StackState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let request = config::load("stack.yaml".as_ref())?;
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(EquinixMetal::new("token", &request.project_id)?),
//!         Arc::new(Ns1::new("api-key")?),
//!         Arc::new(UuidTokenSource),
//!     )?;
//!
//!     let mut state = StackState::load_or_new("state".as_ref(), &request.stack)?;
//!     let provisioned = orchestrator.run(&request, &mut state).await?;
//!     println!("{}", provisioned.result.salt_master_eip);
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod dataflow;
pub mod error;
pub mod orchestrator;
pub mod outputs;
pub mod providers;
pub mod state;

pub use config::{ConfigError, ProvisioningRequest};
pub use error::{ProvisionError, Step, StepCause, StepFailure};
pub use orchestrator::{Orchestrator, Provisioned};
pub use outputs::{OutputRegistry, ProvisioningResult, SALT_MASTER_EIP, SALT_MASTER_IP};
pub use state::StackState;
