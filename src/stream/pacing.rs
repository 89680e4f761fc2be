use std::time::Duration;

use super::control::clamp_fps;

pub fn frame_interval(target_fps: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / clamp_fps(target_fps) as u64)
}

/// Sleep needed to stretch an iteration that took `elapsed` to the target
/// interval. `None` when processing was already slower.
pub fn throttle_delay(elapsed: Duration, target_fps: u32) -> Option<Duration> {
    frame_interval(target_fps)
        .checked_sub(elapsed)
        .filter(|delay| !delay.is_zero())
}

/// Rate implied by one full iteration, sleep included.
pub fn achieved_fps(iteration: Duration) -> f64 {
    let secs = iteration.as_secs_f64();
    if secs > 0.0 {
        1.0 / secs
    } else {
        0.0
    }
}
