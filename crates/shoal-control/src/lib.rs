//! shoal-control — the reconciliation control loop.
//!
//! One tick runs `Sampling → Deciding → Reconciling → Projecting`; a fatal
//! discovery failure aborts the tick from any point before decisions exist.
//! Ticks never overlap: triggers (interval timer or debounced manifest
//! change) feed a capacity-1 channel, so at most one tick is pending while
//! another runs, and both trigger paths share one execution path.
//!
//! Shared mutable state — the cooldown tracker and the current topology
//! snapshot — is owned exclusively by the loop. Workers (samplers,
//! reconcile tasks) return results to the loop, which applies them
//! serially.

pub mod runner;
pub mod trigger;

pub use runner::{ControlLoop, TickError, TickReport};
pub use trigger::{ManifestWatcher, TickTrigger};
