//! Throttled persistence of reading progress.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error};

use crate::services::{BookStatus, ReadingStatus, StatusStore};
use crate::timer::Deadline;
use crate::viewer::ProgressRecord;

pub const SAVE_THROTTLE: Duration = Duration::from_secs(5);

/// Folds a progress record into the previous status. `None` when the record
/// carries no page information or location yet.
///
/// Page numbers are stored 1-based, so the last page counts as completed.
pub fn derive_status(
    previous: Option<&BookStatus>,
    progress: &ProgressRecord,
    now: DateTime<Utc>,
) -> Option<BookStatus> {
    let page = progress.page_info?;
    if page.total == 0 || progress.location.is_empty() {
        return None;
    }
    let current = page.current + 1;
    let total = page.total;
    let advanced = page.current > 0;

    let status = if current >= total {
        ReadingStatus::Completed
    } else if advanced {
        ReadingStatus::Reading
    } else {
        previous.map(|p| p.status).unwrap_or_default()
    };

    let started_at = previous
        .and_then(|p| p.started_at)
        .or_else(|| advanced.then_some(now));
    let completed_at = previous
        .and_then(|p| p.completed_at)
        .or_else(|| (status == ReadingStatus::Completed).then_some(now));

    Some(BookStatus {
        status,
        progress_current: current,
        progress_total: total,
        location: Some(progress.location.clone()),
        last_read_at: Some(now),
        started_at,
        completed_at,
    })
}

/// Leading + trailing throttle around [`StatusStore::update_status`].
#[derive(Debug)]
pub struct ProgressAutosave {
    book_id: String,
    latest: Option<ProgressRecord>,
    dirty: bool,
    last_write: Option<Instant>,
    trailing: Deadline,
    writes: usize,
}

impl ProgressAutosave {
    pub fn new(book_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            latest: None,
            dirty: false,
            last_write: None,
            trailing: Deadline::new(),
            writes: 0,
        }
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn has_pending(&self) -> bool {
        self.dirty
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.trailing.due_at()
    }

    /// Save trigger for every progress change.
    pub fn request_save(&mut self, progress: &ProgressRecord, store: &mut dyn StatusStore, now: Instant) {
        self.latest = Some(progress.clone());
        self.dirty = true;

        match self.last_write {
            Some(at) if now.saturating_duration_since(at) < SAVE_THROTTLE => {
                if !self.trailing.is_armed() {
                    self.trailing.arm_at(at + SAVE_THROTTLE);
                }
            }
            _ => self.save(store, now),
        }
    }

    pub fn tick(&mut self, store: &mut dyn StatusStore, now: Instant) -> bool {
        if !self.trailing.fire(now) || !self.dirty {
            return false;
        }
        self.save(store, now);
        true
    }

    /// Un-throttled write of the last progress, used on teardown.
    pub fn flush(&mut self, store: &mut dyn StatusStore, now: Instant) {
        self.trailing.cancel();
        if self.dirty {
            self.save(store, now);
        }
    }

    fn save(&mut self, store: &mut dyn StatusStore, now: Instant) {
        self.trailing.cancel();
        self.dirty = false;
        self.last_write = Some(now);
        let Some(progress) = self.latest.as_ref() else {
            return;
        };
        match self.write(progress, store) {
            Ok(true) => self.writes += 1,
            Ok(false) => {}
            Err(e) => error!("Failed to update book progress for {}: {e:#}", self.book_id),
        }
    }

    fn write(&self, progress: &ProgressRecord, store: &mut dyn StatusStore) -> Result<bool> {
        let previous = store.get_status(&self.book_id)?;
        let Some(status) = derive_status(previous.as_ref(), progress, Utc::now()) else {
            return Ok(false);
        };
        debug!(
            "Saving progress {}/{} for {}",
            status.progress_current, status.progress_total, self.book_id
        );
        store.update_status(&self.book_id, &status)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::PageInfo;
    use crate::test_utils::MemoryStatusStore;

    fn progress(current: usize, total: usize) -> ProgressRecord {
        ProgressRecord {
            location: format!("epubcfi(/6/4!/4/2:{current})"),
            page_info: Some(PageInfo {
                current,
                next: None,
                total,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_status_derivation() {
        let now = Utc::now();
        let reading = derive_status(None, &progress(1, 10), now).unwrap();
        assert_eq!(reading.status, ReadingStatus::Reading);
        assert_eq!(reading.progress_current, 2);
        assert_eq!(reading.started_at, Some(now));

        let later = now + chrono::Duration::minutes(5);
        let done = derive_status(Some(&reading), &progress(9, 10), later).unwrap();
        assert_eq!(done.status, ReadingStatus::Completed);
        assert_eq!(done.started_at, Some(now));
        assert_eq!(done.completed_at, Some(later));

        let again = derive_status(Some(&done), &progress(9, 10), later + chrono::Duration::minutes(1)).unwrap();
        assert_eq!(again.completed_at, Some(later));
    }

    #[test]
    fn test_first_page_keeps_previous_status() {
        let now = Utc::now();
        let opened = derive_status(None, &progress(0, 10), now).unwrap();
        assert_eq!(opened.status, ReadingStatus::Unread);
        assert_eq!(opened.progress_current, 1);
        assert!(opened.started_at.is_none());

        let previous = BookStatus {
            status: ReadingStatus::Reading,
            started_at: Some(now - chrono::Duration::days(2)),
            ..Default::default()
        };
        let back = derive_status(Some(&previous), &progress(0, 10), now).unwrap();
        assert_eq!(back.status, ReadingStatus::Reading);
        assert_eq!(back.started_at, previous.started_at);
    }

    #[test]
    fn test_record_without_pages_is_skipped() {
        let record = ProgressRecord {
            location: "epubcfi(/6/2!/4)".into(),
            ..Default::default()
        };
        assert!(derive_status(None, &record, Utc::now()).is_none());
    }

    #[test]
    fn test_burst_writes_leading_and_flush_only() {
        let start = Instant::now();
        let mut store = MemoryStatusStore::default();
        let mut autosave = ProgressAutosave::new("b1");

        for i in 0..10u64 {
            let now = start + Duration::from_millis(i * 100);
            autosave.request_save(&progress(i as usize, 100), &mut store, now);
            autosave.tick(&mut store, now);
        }
        assert_eq!(autosave.writes(), 1);

        autosave.flush(&mut store, start + Duration::from_secs(1));
        assert_eq!(autosave.writes(), 2);
        assert_eq!(store.updates, 2);
        assert_eq!(store.get_status("b1").unwrap().unwrap().progress_current, 10);
        assert!(autosave.next_deadline().is_none());
    }

    #[test]
    fn test_trailing_write_fires_after_window() {
        let start = Instant::now();
        let mut store = MemoryStatusStore::default();
        let mut autosave = ProgressAutosave::new("b1");

        autosave.request_save(&progress(1, 100), &mut store, start);
        autosave.request_save(&progress(2, 100), &mut store, start + Duration::from_secs(1));
        assert!(!autosave.tick(&mut store, start + Duration::from_millis(4999)));
        assert!(autosave.tick(&mut store, start + SAVE_THROTTLE));
        assert_eq!(store.get_status("b1").unwrap().unwrap().progress_current, 3);

        // Nothing new since the trailing write.
        autosave.flush(&mut store, start + Duration::from_secs(6));
        assert_eq!(autosave.writes(), 2);
    }

    #[test]
    fn test_store_failure_is_logged_not_propagated() {
        let mut store = MemoryStatusStore {
            fail: true,
            ..Default::default()
        };
        let mut autosave = ProgressAutosave::new("b1");
        autosave.request_save(&progress(1, 10), &mut store, Instant::now());
        assert_eq!(autosave.writes(), 0);
        assert!(!autosave.has_pending());
    }
}
