//! NS1 managed DNS provider.

mod client;
mod models;

pub use client::Ns1;
pub use models::*;
