//! shoal-discovery — service discovery from compose-style manifests.
//!
//! Parses the `services:` map of a compose file into [`ServiceDescriptor`]s,
//! merging each service's `shoal.scale.*` labels over the config-file rule
//! defaults and reading `shoal.proxy.*` routing options.
//!
//! Discovery is idempotent and side-effect-free. A manifest that fails to
//! read or parse is fatal to the tick that requested it; a single service
//! entry with an unparseable shape is logged and skipped instead.

pub mod compose;
pub mod error;
mod labels;

pub use compose::ComposeDiscovery;
pub use error::DiscoveryError;

use std::path::Path;

use shoal_core::ServiceDescriptor;

/// The discovery seam consumed by the control loop.
pub trait ServiceDiscovery: Send + Sync {
    fn list_services(&self, manifest: &Path) -> Result<Vec<ServiceDescriptor>, DiscoveryError>;
}
