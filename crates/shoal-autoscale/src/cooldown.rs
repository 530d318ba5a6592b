//! Per-service cooldown state.

use std::collections::HashMap;
use std::time::Duration;

use shoal_core::ScaleDirection;

/// Observable cooldown state for one service.
///
/// Newly observed services start `Idle`. Accepting a decision re-arms the
/// tracker in that decision's direction; the state reverts to `Idle` once
/// the cooldown window has fully elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownState {
    Idle,
    CoolingUp,
    CoolingDown,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    direction: ScaleDirection,
    at: u64,
}

/// Tracks the last accepted scaling action per service.
///
/// Owned exclusively by the control loop; the policy only reads it.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    armed: HashMap<String, Armed>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for a service given its rule's cooldown window.
    pub fn state(&self, service: &str, cooldown: Duration, now: u64) -> CooldownState {
        match self.armed.get(service) {
            None => CooldownState::Idle,
            Some(armed) if now.saturating_sub(armed.at) >= cooldown.as_secs() => {
                CooldownState::Idle
            }
            Some(armed) => match armed.direction {
                ScaleDirection::Up => CooldownState::CoolingUp,
                ScaleDirection::Down => CooldownState::CoolingDown,
                ScaleDirection::None => CooldownState::Idle,
            },
        }
    }

    /// Whether a candidate decision in `direction` is blocked. Only the
    /// same direction as the armed one blocks; a reversal is always
    /// eligible.
    pub fn blocks(
        &self,
        service: &str,
        direction: ScaleDirection,
        cooldown: Duration,
        now: u64,
    ) -> bool {
        matches!(
            (self.state(service, cooldown, now), direction),
            (CooldownState::CoolingUp, ScaleDirection::Up)
                | (CooldownState::CoolingDown, ScaleDirection::Down)
        )
    }

    /// Record an accepted decision, re-arming the window in its direction.
    pub fn record(&mut self, service: &str, direction: ScaleDirection, now: u64) {
        if direction == ScaleDirection::None {
            return;
        }
        self.armed
            .insert(service.to_string(), Armed { direction, at: now });
    }

    /// Drop state for services that no longer exist.
    pub fn retain<F: Fn(&str) -> bool>(&mut self, keep: F) {
        self.armed.retain(|service, _| keep(service));
    }
}
