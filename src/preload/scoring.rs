/*!
 * Prediction Scoring
 *
 * confidence = RECENCY_WEIGHT * recency + FREQUENCY_WEIGHT * frequency
 *
 * - recency decays linearly from 1.0 to 0.0 across `CONFIDENCE_DECAY_WINDOW`
 * - frequency is the transition count capped at `CONFIDENCE_FREQUENCY_CAP`, scaled to [0, 1]
 */

use super::patterns::NavigationPattern;
use crate::core::limits::{
    CONFIDENCE_DECAY_WINDOW, CONFIDENCE_FREQUENCY_CAP, CONFIDENCE_FREQUENCY_WEIGHT,
    CONFIDENCE_RECENCY_WEIGHT,
};
use std::time::{Duration, SystemTime};

/// 1.0 for a transition seen now, 0.0 once the decay window has passed
#[inline]
pub fn recency_decay(age: Duration) -> f64 {
    (1.0 - age.as_secs_f64() / CONFIDENCE_DECAY_WINDOW.as_secs_f64()).clamp(0.0, 1.0)
}

#[inline]
pub fn capped_frequency(frequency: u32) -> f64 {
    f64::from(frequency.min(CONFIDENCE_FREQUENCY_CAP)) / f64::from(CONFIDENCE_FREQUENCY_CAP)
}

/// Blend of recency and frequency, in [0, 1]
pub fn confidence(pattern: &NavigationPattern, now: SystemTime) -> f64 {
    // Clock skew into the future counts as "just seen"
    let age = now
        .duration_since(pattern.last_seen_at)
        .unwrap_or(Duration::ZERO);
    CONFIDENCE_RECENCY_WEIGHT * recency_decay(age)
        + CONFIDENCE_FREQUENCY_WEIGHT * capped_frequency(pattern.frequency)
}
