//! Hybrid sleep + spin frame pacing

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Below this remainder the limiter spins without sleeping
const SPIN_ONLY_THRESHOLD: Duration = Duration::from_millis(1);
/// Remainders shorter than this sleep only an eighth, longer ones three quarters
const SHORT_WAIT: Duration = Duration::from_millis(30);

/// What the last [`FrameLimiter::wait`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitReport {
    pub slept: Duration,
    pub spun: bool,
}

/// Releases the caller once per frame interval, measured from the previous
/// release rather than a fixed epoch, so a late frame never causes a burst.
#[derive(Debug)]
pub struct FrameLimiter {
    desired_fps: u32,
    frame_interval: Duration,
    last_frame: Instant,
}

impl FrameLimiter {
    /// `desired_fps` of zero is treated as one
    pub fn new(desired_fps: u32) -> Self {
        let desired_fps = desired_fps.max(1);
        Self {
            desired_fps,
            frame_interval: Duration::from_nanos(1_000_000_000 / u64::from(desired_fps)),
            last_frame: Instant::now(),
        }
    }

    pub fn desired_fps(&self) -> u32 {
        self.desired_fps
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Restart the interval from now
    pub fn reset(&mut self) {
        self.last_frame = Instant::now();
    }

    /// Block until the next frame boundary.
    pub fn wait(&mut self) -> WaitReport {
        self.pace(None)
    }

    /// Like [`FrameLimiter::wait`], but returns `false` as soon as `cancel`
    /// is observed set during the spin phase.
    pub fn wait_cancellable(&mut self, cancel: &AtomicBool) -> bool {
        self.pace(Some(cancel));
        !cancel.load(Ordering::Relaxed)
    }

    fn pace(&mut self, cancel: Option<&AtomicBool>) -> WaitReport {
        let start = Instant::now();
        let mut report = WaitReport::default();

        let deadline = self.last_frame + self.frame_interval;
        let remaining = deadline.saturating_duration_since(start);

        if remaining > SPIN_ONLY_THRESHOLD {
            report.slept = if remaining < SHORT_WAIT {
                remaining / 8
            } else {
                remaining / 4 * 3
            };
            thread::sleep(report.slept);
        }

        while Instant::now() < deadline {
            report.spun = true;
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                break;
            }
            hint::spin_loop();
        }

        self.last_frame = Instant::now();
        report
    }
}
