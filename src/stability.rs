use std::time::{Duration, Instant};

use crate::surface::LayoutSnapshot;
use crate::timer::Deadline;

pub const START_DELAY: Duration = Duration::from_millis(150);
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);
pub const SETTLE_DELAY: Duration = Duration::from_millis(150);
pub const FALLBACK_DELAY: Duration = Duration::from_millis(100);
pub const MAX_FRAMES: u32 = 15;
pub const STABLE_SAMPLES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Waiting,
    Sampling {
        frames: u32,
        stable: u32,
        last: Option<LayoutSnapshot>,
    },
    Emitting,
}

/// Collapses a burst of resize churn into one "layout stable" notification.
///
/// After a start delay the renderer geometry is sampled once per frame.
/// Five unchanged samples in a row emit after a settle delay; fifteen frames
/// without settling emit after a shorter fallback delay.
#[derive(Debug)]
pub struct LayoutStabilityDetector {
    phase: Phase,
    deadline: Deadline,
}

impl Default for LayoutStabilityDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutStabilityDetector {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            deadline: Deadline::new(),
        }
    }

    /// Starts (or restarts) detection.
    pub fn start(&mut self, now: Instant) {
        self.phase = Phase::Waiting;
        self.deadline.arm(now, START_DELAY);
    }

    pub fn is_running(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn cancel(&mut self) {
        self.phase = Phase::Idle;
        self.deadline.cancel();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline.due_at()
    }

    /// Advances the detector. `probe` measures the renderer and returns
    /// `None` when it cannot be measured. Returns true when "stable" should
    /// be emitted.
    pub fn tick(
        &mut self,
        now: Instant,
        probe: impl FnOnce() -> Option<LayoutSnapshot>,
    ) -> bool {
        if !self.deadline.fire(now) {
            return false;
        }

        match self.phase {
            Phase::Idle => false,
            Phase::Waiting => match probe() {
                None => {
                    self.phase = Phase::Idle;
                    true
                }
                Some(sample) => {
                    self.sample(now, 0, 0, None, sample);
                    false
                }
            },
            Phase::Sampling {
                frames,
                stable,
                last,
            } => match probe() {
                None => {
                    self.phase = Phase::Idle;
                    true
                }
                Some(sample) => {
                    self.sample(now, frames, stable, last, sample);
                    false
                }
            },
            Phase::Emitting => {
                self.phase = Phase::Idle;
                true
            }
        }
    }

    fn sample(
        &mut self,
        now: Instant,
        frames: u32,
        stable: u32,
        last: Option<LayoutSnapshot>,
        current: LayoutSnapshot,
    ) {
        let frames = frames + 1;
        let stable = match last {
            Some(previous) if previous == current => stable + 1,
            Some(_) => 0,
            None => stable,
        };

        if stable >= STABLE_SAMPLES {
            self.phase = Phase::Emitting;
            self.deadline.arm(now, SETTLE_DELAY);
        } else if frames >= MAX_FRAMES {
            self.phase = Phase::Emitting;
            self.deadline.arm(now, FALLBACK_DELAY);
        } else {
            self.phase = Phase::Sampling {
                frames,
                stable,
                last: Some(current),
            };
            self.deadline.arm(now, FRAME_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(width: f64) -> LayoutSnapshot {
        LayoutSnapshot {
            scroll_width: width,
            scroll_height: 800.0,
            child_count: 3,
        }
    }

    /// Ticks every frame until stable is emitted; returns elapsed time.
    fn run(detector: &mut LayoutStabilityDetector, start: Instant, widths: &[f64]) -> Duration {
        let mut now = start;
        let mut frame = 0usize;
        loop {
            now += Duration::from_millis(1);
            let width = widths[frame.min(widths.len() - 1)];
            let mut probed = false;
            if detector.tick(now, || {
                probed = true;
                Some(snapshot(width))
            }) {
                return now - start;
            }
            if probed {
                frame += 1;
            }
            assert!(now - start < Duration::from_secs(5), "detector never emitted");
        }
    }

    #[test]
    fn test_stable_layout_emits_after_settle_delay() {
        let start = Instant::now();
        let mut detector = LayoutStabilityDetector::new();
        detector.start(start);

        let elapsed = run(&mut detector, start, &[400.0]);
        // Start delay, six samples 16ms apart, then the settle delay.
        assert!(elapsed >= START_DELAY + FRAME_INTERVAL * 5 + SETTLE_DELAY);
        assert!(elapsed < START_DELAY + FRAME_INTERVAL * 6 + SETTLE_DELAY + Duration::from_millis(20));
        assert!(!detector.is_running());
    }

    #[test]
    fn test_unsettled_layout_falls_back_after_fifteen_frames() {
        let start = Instant::now();
        let mut detector = LayoutStabilityDetector::new();
        detector.start(start);

        let widths: Vec<f64> = (0..40).map(|i| 400.0 + i as f64).collect();
        let elapsed = run(&mut detector, start, &widths);
        assert!(elapsed >= START_DELAY + FRAME_INTERVAL * 14 + FALLBACK_DELAY);
    }

    #[test]
    fn test_missing_probe_emits_immediately() {
        let start = Instant::now();
        let mut detector = LayoutStabilityDetector::new();
        detector.start(start);
        assert!(!detector.tick(start + Duration::from_millis(149), || None));
        assert!(detector.tick(start + START_DELAY, || None));
    }

    #[test]
    fn test_restart_replaces_running_detection() {
        let start = Instant::now();
        let mut detector = LayoutStabilityDetector::new();
        detector.start(start);
        detector.start(start + Duration::from_millis(100));
        assert!(!detector.tick(start + Duration::from_millis(200), || None));
        assert!(detector.tick(start + Duration::from_millis(250), || None));
    }
}
