//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Jitter adds up to this fraction of the base delay.
const JITTER_RATIO: f64 = 0.2;

/// Delay before the retry that follows failed attempt `attempt` (0-based):
/// `min(initial * factor^attempt, max)`.
pub fn calculate_backoff(attempt: u32, initial: Duration, factor: f64, max: Duration) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = initial.as_secs_f64() * factor.powi(exponent);

    if !secs.is_finite() || secs >= max.as_secs_f64() {
        return max;
    }
    Duration::from_nanos((secs.max(0.0) * 1e9).round() as u64)
}

/// Add a uniform random addend in `[0, 0.2 * delay]`.
///
/// Applied after the cap and not clamped, so retriers sitting at `max_delay`
/// still spread out.
pub fn apply_jitter(delay: Duration) -> Duration {
    let range = delay.as_secs_f64() * JITTER_RATIO;
    let jitter = if range > 0.0 {
        rand::thread_rng().gen_range(0.0..=range)
    } else {
        0.0
    };

    delay.saturating_add(Duration::from_secs_f64(jitter))
}
