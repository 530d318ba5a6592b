//! shoal-autoscale — watermark-driven scaling decisions.
//!
//! The policy is a pure function over injected state: no I/O, no clock
//! reads. The control loop owns a [`CooldownTracker`] and passes `now` in,
//! which keeps every branch unit-testable without a running clock.
//!
//! # Decision algorithm
//!
//! ```text
//! if current is outside [min, max]:
//!     clamp toward the nearest bound            // "bounds correction",
//!                                               // exempt from cooldown
//! else if sample is missing or invalid:
//!     no-op                                     // "metric unavailable"
//! else if value > high_watermark:
//!     target = min(current + step, max)         // direction = up
//! else if value < low_watermark:
//!     target = max(current - step, min)         // direction = down
//! else:
//!     no-op                                     // "within band"
//!
//! a non-no-op candidate whose direction is still cooling is suppressed
//! to a no-op ("cooldown active"); the opposite direction is never blocked
//! ```

pub mod cooldown;
pub mod policy;

pub use cooldown::{CooldownState, CooldownTracker};
pub use policy::evaluate;
