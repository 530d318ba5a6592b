//! The scaling decision function.

use tracing::debug;

use shoal_core::{
    DecisionReason, MetricSample, ScaleDirection, ScalingDecision, ScalingRule,
};

use crate::cooldown::CooldownTracker;

/// Evaluate one service for one tick.
///
/// Pure and deterministic: all inputs, including `now`, are injected. The
/// tracker is only read; recording an accepted decision is the caller's
/// responsibility (bounds corrections are never recorded — they are
/// correctness fixes, not reactive scales).
pub fn evaluate(
    service: &str,
    current: u32,
    rule: &ScalingRule,
    sample: Option<&MetricSample>,
    tracker: &CooldownTracker,
    now: u64,
) -> ScalingDecision {
    // A replica count outside the bounds (e.g. externally edited) is clamped
    // toward the nearest bound regardless of metric value or cooldown.
    if current < rule.min_replicas {
        return decision(
            service,
            current,
            rule.min_replicas,
            ScaleDirection::Up,
            DecisionReason::BoundsCorrection,
        );
    }
    if current > rule.max_replicas {
        return decision(
            service,
            current,
            rule.max_replicas,
            ScaleDirection::Down,
            DecisionReason::BoundsCorrection,
        );
    }

    let sample = match sample {
        Some(sample) if sample.valid => sample,
        _ => {
            // Never scale blindly.
            return decision(
                service,
                current,
                current,
                ScaleDirection::None,
                DecisionReason::MetricUnavailable,
            );
        }
    };

    let (direction, target, reason) = if sample.value > rule.high_watermark {
        (
            ScaleDirection::Up,
            (current + rule.step).min(rule.max_replicas),
            DecisionReason::HighWatermark,
        )
    } else if sample.value < rule.low_watermark {
        (
            ScaleDirection::Down,
            current.saturating_sub(rule.step).max(rule.min_replicas),
            DecisionReason::LowWatermark,
        )
    } else {
        (ScaleDirection::None, current, DecisionReason::WithinBand)
    };

    if target != current && tracker.blocks(service, direction, rule.cooldown(), now) {
        debug!(
            service,
            value = sample.value,
            "candidate scaling decision suppressed by cooldown"
        );
        return decision(
            service,
            current,
            current,
            ScaleDirection::None,
            DecisionReason::CooldownActive,
        );
    }

    decision(service, current, target, direction, reason)
}

fn decision(
    service: &str,
    current: u32,
    target: u32,
    direction: ScaleDirection,
    reason: DecisionReason,
) -> ScalingDecision {
    ScalingDecision {
        service: service.to_string(),
        current_replicas: current,
        target_replicas: target,
        direction,
        reason,
    }
}
