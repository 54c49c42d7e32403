//! Collaborators the engine talks to but does not implement.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotation::{Annotation, AnnotationPatch, NewAnnotation, NoteContext};

/// Persistence for annotations and notes.
pub trait NoteService {
    fn create_note(&mut self, payload: NewAnnotation) -> Result<Annotation>;
    fn update_note(&mut self, id: &str, patch: &AnnotationPatch) -> Result<Annotation>;
    fn delete_note(&mut self, id: &str) -> Result<()>;
    /// Opens the host's note editor prefilled with a quote and its context.
    fn open_note_draft(&mut self, draft: NoteDraft) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDraft {
    pub book_id: String,
    pub cfi: Option<String>,
    pub quote: String,
    pub context: NoteContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainMode {
    Explain,
    Translate,
}

pub trait AssistantBridge {
    fn send_explain_request(&mut self, text: &str, mode: ExplainMode, book_id: &str);
    fn send_ask_ai_request(&mut self, text: &str, query: &str, book_id: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    #[default]
    Unread,
    Reading,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BookStatus {
    pub status: ReadingStatus,
    pub progress_current: usize,
    pub progress_total: usize,
    pub location: Option<String>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Persisted reading status per book.
pub trait StatusStore {
    fn get_status(&self, book_id: &str) -> Result<Option<BookStatus>>;
    fn update_status(&mut self, book_id: &str, status: &BookStatus) -> Result<()>;
}

/// Destination of copied selections.
pub trait Clipboard {
    fn set_text(&mut self, text: &str) -> Result<()>;
}

/// The desktop clipboard.
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        let mut clipboard = arboard::Clipboard::new().context("Failed to access clipboard")?;
        clipboard
            .set_text(text.to_string())
            .context("Failed to copy to clipboard")
    }
}
