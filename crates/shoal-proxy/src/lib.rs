//! shoal-proxy — projecting topology into the proxy's routing document.
//!
//! The projection is a deterministic mapping: one routing rule and one
//! backend pool per service, pools listing exactly the live endpoints of
//! the current [`TopologySnapshot`](shoal_core::TopologySnapshot). Identical
//! snapshots produce byte-identical documents.
//!
//! The document is written through a scoped temp-file-then-rename sequence
//! so the proxy never observes a half-written file; on failure the previous
//! document on disk stays authoritative.

pub mod document;
pub mod projector;

pub use document::{BackendEntry, HttpSection, LoadBalancer, RouterEntry, RoutingDocument, ServerEntry};
pub use projector::{ConfigProjector, ProjectionError};
