//! Equinix Metal provider.
//!
//! Implements the [`MetalProvider`](super::MetalProvider) trait for the
//! Equinix Metal API.

mod client;
mod models;

pub use client::EquinixMetal;
pub use models::*;
