// Export modules for use in tests
pub mod annotation;
pub mod annotator;
pub mod autosave;
pub mod cfi;
pub mod error;
pub mod event_router;
pub mod event_source;
pub mod notification;
pub mod overlay;
pub mod pagination;
pub mod popup;
pub mod reader;
pub mod reading_status;
pub mod selection;
pub mod services;
pub mod settings;
pub mod shortcuts;
pub mod stability;
pub mod style;
pub mod surface;
pub mod timer;
pub mod transform;
pub mod viewer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the per-book entry points
pub use error::ViewerError;
pub use reader::{ReaderPane, ReaderPanes, Services};
pub use viewer::{ProgressRecord, Viewer, ViewerConfig};
