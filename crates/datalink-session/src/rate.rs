//! Sequence burst sizing and rate smoothing.
//!
//! The thresholds were tuned against the peer application and are part of
//! the interoperable behaviour; change them only together with the peer.

use std::time::Instant;

/// Frames per tick when adaptive rate is disabled.
pub const FIXED_BURST: usize = 5;
/// Frames per tick when the receiver keeps up.
pub const FULL_BURST: usize = 4;
/// Unacknowledged frames at which sending pauses.
pub const PAUSE_DELTA: i32 = 20;
/// Unacknowledged frames at which one frame per tick is sent.
pub const CRAWL_DELTA: i32 = 10;
/// Unacknowledged frames at which two frames per tick are sent.
pub const SLOW_DELTA: i32 = 5;
/// Weight of a new measurement in the smoothed rates.
pub const RATE_SMOOTHING: f32 = 0.5;

/// Frames to push this tick given `delta = cursor - last_acked`.
pub fn burst_for_delta(delta: i32, adaptive: bool) -> usize {
    if !adaptive {
        return FIXED_BURST;
    }
    match delta {
        d if d >= PAUSE_DELTA => 0,
        d if d >= CRAWL_DELTA => 1,
        d if d >= SLOW_DELTA => 2,
        _ => FULL_BURST,
    }
}

pub fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t
}

/// Smoothed events-per-second meter.
#[derive(Debug, Clone)]
pub struct RateMeter {
    last: Option<Instant>,
    rate: f32,
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateMeter {
    pub fn new() -> Self {
        Self {
            last: None,
            rate: 0.0,
        }
    }

    /// Record one event at `now` and return the smoothed rate.
    ///
    /// The first event only starts the clock.
    pub fn tick(&mut self, now: Instant) -> f32 {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f32();
            if dt > 0.0 {
                self.rate = lerp(self.rate, 1.0 / dt, RATE_SMOOTHING);
            }
        }
        self.last = Some(now);
        self.rate
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
