//! Bootstrap payload composition.
//!
//! The payload is a cloud-init shell script handed to the salt master as
//! user-data. It is assembled from the request's credentials and the peer
//! token, and must render byte-identically for identical inputs.

mod config;
mod template;

pub use config::{teleport_domain, BootstrapConfig, BootstrapConfigBuilder};
pub use template::{CloudInitComposer, ComposeError, Composer};
