use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::services::{BookStatus, StatusStore};

/// Per-book reading status, kept in memory and optionally mirrored to a
/// JSON file after every update.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingStatuses {
    books: HashMap<String, BookStatus>,
    #[serde(skip)]
    file_path: Option<PathBuf>,
}

impl ReadingStatuses {
    pub fn ephemeral() -> Self {
        Self {
            books: HashMap::new(),
            file_path: None,
        }
    }

    pub fn with_file(file_path: impl Into<PathBuf>) -> Self {
        Self {
            books: HashMap::new(),
            file_path: Some(file_path.into()),
        }
    }

    pub fn load_or_ephemeral(file_path: Option<&Path>) -> Self {
        match file_path {
            Some(path) => Self::load_from_file(path).unwrap_or_else(|e| {
                log::error!("Failed to load reading statuses from {path:?}: {e:#}");
                Self::with_file(path)
            }),
            None => Self::ephemeral(),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::with_file(path));
        }
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {path:?}"))?;
        let mut statuses: Self =
            serde_json::from_str(&content).with_context(|| format!("Failed to parse {path:?}"))?;
        statuses.file_path = Some(path.to_path_buf());
        Ok(statuses)
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {path:?}"))?;
        Ok(())
    }

    pub fn get(&self, book_id: &str) -> Option<&BookStatus> {
        self.books.get(book_id)
    }

    /// The book read most recently, if any was read at all.
    pub fn most_recent(&self) -> Option<(&str, &BookStatus)> {
        self.books
            .iter()
            .filter(|(_, status)| status.last_read_at.is_some())
            .max_by_key(|(_, status)| status.last_read_at)
            .map(|(id, status)| (id.as_str(), status))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BookStatus)> {
        self.books.iter()
    }
}

impl StatusStore for ReadingStatuses {
    fn get_status(&self, book_id: &str) -> Result<Option<BookStatus>> {
        Ok(self.books.get(book_id).cloned())
    }

    fn update_status(&mut self, book_id: &str, status: &BookStatus) -> Result<()> {
        self.books.insert(book_id.to_string(), status.clone());
        self.save()
            .with_context(|| format!("Failed to persist reading status of {book_id}"))
    }
}
