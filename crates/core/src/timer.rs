//! Frame timing and the frames-per-second limiter.

use std::time::{Duration, Instant};

/// How often the frame rate estimate is refreshed.
const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Loop timer tracking delta time and a once-per-second frame rate estimate.
#[derive(Debug)]
pub struct Timer {
    last_tick: Instant,
    window_start: Instant,
    window_frames: u32,
    fps: f32,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        Self {
            last_tick: now,
            window_start: now,
            window_frames: 0,
            fps: 0.0,
        }
    }

    /// Marks the end of a frame and returns the time since the previous one.
    pub fn tick(&mut self) -> Duration {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Duration {
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        self.window_frames += 1;
        let window = now.saturating_duration_since(self.window_start);
        if window >= FPS_WINDOW {
            self.fps = self.window_frames as f32 / window.as_secs_f32();
            self.window_frames = 0;
            self.window_start = now;
        }

        delta
    }

    /// Delta time in seconds since the last tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Frames per second measured over the last completed window.
    pub fn fps(&self) -> f32 {
        self.fps
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Caps how often the driving loop is allowed to start a frame.
///
/// A cap of `0` disables limiting. The loop asks [`FrameLimiter::ready`]
/// before beginning a frame and simply skips the iteration when it returns
/// `false`.
#[derive(Debug, Clone)]
pub struct FrameLimiter {
    interval: Option<Duration>,
    last_frame: Option<Instant>,
}

impl FrameLimiter {
    /// Creates a limiter for the given cap in frames per second.
    pub fn new(fps_cap: u32) -> Self {
        Self {
            interval: interval_for(fps_cap),
            last_frame: None,
        }
    }

    /// Changes the cap; `0` removes it.
    pub fn set_cap(&mut self, fps_cap: u32) {
        self.interval = interval_for(fps_cap);
    }

    /// Returns the configured cap, `0` when unlimited.
    pub fn cap(&self) -> u32 {
        self.interval
            .map(|interval| (1.0 / interval.as_secs_f64()).round() as u32)
            .unwrap_or(0)
    }

    /// Returns `true` and records the frame start when enough time has passed.
    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    /// Same as [`FrameLimiter::ready`] with an explicit clock reading.
    pub fn ready_at(&mut self, now: Instant) -> bool {
        let Some(interval) = self.interval else {
            self.last_frame = Some(now);
            return true;
        };

        match self.last_frame {
            Some(last) if now.saturating_duration_since(last) < interval => false,
            _ => {
                self.last_frame = Some(now);
                true
            }
        }
    }

    /// Time left until the next frame may start.
    pub fn remaining(&self, now: Instant) -> Duration {
        match (self.interval, self.last_frame) {
            (Some(interval), Some(last)) => {
                interval.saturating_sub(now.saturating_duration_since(last))
            }
            _ => Duration::ZERO,
        }
    }
}

fn interval_for(fps_cap: u32) -> Option<Duration> {
    (fps_cap > 0).then(|| Duration::from_secs_f64(1.0 / fps_cap as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_without_cap_is_always_ready() {
        let mut limiter = FrameLimiter::new(0);
        let now = Instant::now();
        assert!(limiter.ready_at(now));
        assert!(limiter.ready_at(now));
        assert_eq!(limiter.cap(), 0);
        assert_eq!(limiter.remaining(now), Duration::ZERO);
    }

    #[test]
    fn test_limiter_skips_frames_inside_interval() {
        let mut limiter = FrameLimiter::new(50);
        let start = Instant::now();

        assert!(limiter.ready_at(start));
        assert!(!limiter.ready_at(start + Duration::from_millis(5)));
        assert!(!limiter.ready_at(start + Duration::from_millis(19)));
        assert!(limiter.ready_at(start + Duration::from_millis(20)));
    }

    #[test]
    fn test_limiter_remaining() {
        let mut limiter = FrameLimiter::new(100);
        let start = Instant::now();
        assert!(limiter.ready_at(start));
        assert_eq!(
            limiter.remaining(start + Duration::from_millis(4)),
            Duration::from_millis(6)
        );
        assert_eq!(
            limiter.remaining(start + Duration::from_millis(40)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_limiter_set_cap() {
        let mut limiter = FrameLimiter::new(0);
        limiter.set_cap(60);
        assert_eq!(limiter.cap(), 60);
        limiter.set_cap(0);
        assert_eq!(limiter.cap(), 0);
    }

    #[test]
    fn test_timer_fps_window() {
        let start = Instant::now();
        let mut timer = Timer::starting_at(start);

        for i in 1..=30 {
            timer.tick_at(start + Duration::from_millis(i * 20));
        }
        // 30 frames over 600ms: window not complete yet
        assert_eq!(timer.fps(), 0.0);

        for i in 31..=50 {
            timer.tick_at(start + Duration::from_millis(i * 20));
        }
        // 50 frames over exactly one second
        assert!((timer.fps() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_timer_delta() {
        let start = Instant::now();
        let mut timer = Timer::starting_at(start);
        let delta = timer.tick_at(start + Duration::from_millis(16));
        assert_eq!(delta, Duration::from_millis(16));
    }
}
