use std::time::{Duration, Instant};

pub const DEFAULT_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient user-facing message.
#[derive(Debug, Clone)]
pub struct Notification {
    pub message: String,
    pub level: NotificationLevel,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Notification {
    pub fn new(
        message: impl Into<String>,
        level: NotificationLevel,
        now: Instant,
        duration: Duration,
    ) -> Self {
        Self {
            message: message.into(),
            level,
            created_at: now,
            expires_at: now + duration,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn time_remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Newest-first stack of notifications; expiry is driven by [`update`](Self::update).
#[derive(Debug)]
pub struct NotificationManager {
    notifications: Vec<Notification>,
    default_duration: Duration,
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::with_default_duration(DEFAULT_DURATION)
    }

    pub fn with_default_duration(default_duration: Duration) -> Self {
        Self {
            notifications: Vec::new(),
            default_duration,
        }
    }

    pub fn notify(&mut self, message: impl Into<String>, level: NotificationLevel, now: Instant) {
        let notification = Notification::new(message, level, now, self.default_duration);
        self.notifications.insert(0, notification);
    }

    pub fn info(&mut self, message: impl Into<String>, now: Instant) {
        self.notify(message, NotificationLevel::Info, now);
    }

    pub fn success(&mut self, message: impl Into<String>, now: Instant) {
        self.notify(message, NotificationLevel::Success, now);
    }

    pub fn warn(&mut self, message: impl Into<String>, now: Instant) {
        self.notify(message, NotificationLevel::Warning, now);
    }

    pub fn error(&mut self, message: impl Into<String>, now: Instant) {
        self.notify(message, NotificationLevel::Error, now);
    }

    /// Remove expired notifications, returns true if any were removed
    pub fn update(&mut self, now: Instant) -> bool {
        let initial_len = self.notifications.len();
        self.notifications.retain(|n| !n.is_expired(now));
        self.notifications.len() != initial_len
    }

    pub fn current(&self) -> Option<&Notification> {
        self.notifications.first()
    }

    pub fn all(&self) -> &[Notification] {
        &self.notifications
    }

    /// Earliest expiry, for the host loop's poll timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.notifications.iter().map(|n| n.expires_at).min()
    }

    pub fn clear(&mut self) {
        self.notifications.clear();
    }

    pub fn dismiss_current(&mut self) -> bool {
        if self.notifications.is_empty() {
            false
        } else {
            self.notifications.remove(0);
            true
        }
    }

    pub fn has_notifications(&self) -> bool {
        !self.notifications.is_empty()
    }

    pub fn count(&self) -> usize {
        self.notifications.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_expiration() {
        let now = Instant::now();
        let notification = Notification::new("test", NotificationLevel::Info, now, Duration::from_millis(50));
        assert!(!notification.is_expired(now + Duration::from_millis(49)));
        assert!(notification.is_expired(now + Duration::from_millis(50)));
        assert_eq!(notification.time_remaining(now + Duration::from_millis(20)), Duration::from_millis(30));
    }

    #[test]
    fn manager_adds_and_retrieves() {
        let now = Instant::now();
        let mut manager = NotificationManager::new();

        manager.info("First", now);
        manager.warn("Second", now);
        manager.error("Failed to save annotation", now);

        assert_eq!(manager.count(), 3);

        let current = manager.current().unwrap();
        assert_eq!(current.message, "Failed to save annotation");
        assert_eq!(current.level, NotificationLevel::Error);
    }

    #[test]
    fn manager_removes_expired() {
        let now = Instant::now();
        let mut manager = NotificationManager::with_default_duration(Duration::from_millis(50));

        manager.success("Copied", now);
        assert_eq!(manager.next_deadline(), Some(now + Duration::from_millis(50)));
        assert!(!manager.update(now + Duration::from_millis(10)));
        assert!(manager.update(now + Duration::from_millis(60)));
        assert_eq!(manager.count(), 0);
        assert!(manager.next_deadline().is_none());
    }

    #[test]
    fn manager_dismiss_current() {
        let now = Instant::now();
        let mut manager = NotificationManager::new();

        manager.info("First", now);
        manager.info("Second", now);

        assert!(manager.dismiss_current());
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.current().unwrap().message, "First");
        manager.clear();
        assert!(!manager.dismiss_current());
        assert!(!manager.has_notifications());
    }
}
