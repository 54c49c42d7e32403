use std::time::{Duration, Instant};

/// A single pending timer owned by the component that armed it.
///
/// Arming again replaces the previous deadline, so at most one firing is
/// outstanding. Owners poll it from the host tick with the current instant.
#[derive(Debug, Default, Clone)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn new() -> Self {
        Self { at: None }
    }

    pub fn arm(&mut self, now: Instant, delay: Duration) {
        self.at = Some(now + delay);
    }

    pub fn arm_at(&mut self, at: Instant) {
        self.at = Some(at);
    }

    pub fn cancel(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    pub fn due_at(&self) -> Option<Instant> {
        self.at
    }

    /// Returns true exactly once when the deadline has passed, disarming it.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.at {
            Some(at) if now >= at => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}
