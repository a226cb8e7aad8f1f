//! Upstream proxy: settings loading and authenticated forwarding.

pub mod forward;
pub mod settings;

pub use forward::{build_client, ProxyForwarder};
