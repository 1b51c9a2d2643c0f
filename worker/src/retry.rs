use std::time::Duration;

use rand::Rng;

/// Exponential backoff with cap and jitter (§4.8, §7). `attempt` is
/// 1-indexed (the first retry uses `attempt = 1`).
pub fn backoff(attempt: u32, base_secs: f64, cap_secs: f64) -> Duration {
    let exponential = base_secs * 2f64.powi(attempt.saturating_sub(1) as i32);
    let capped = exponential.min(cap_secs.max(base_secs));
    let jitter_fraction: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let jittered = capped * (0.5 + 0.5 * jitter_fraction);
    Duration::from_secs_f64(jittered.max(0.0))
}
