use std::time::{Duration, Instant};

use log::debug;

use crate::surface::{NativeSelection, PointerUp, RangeHandle, Rect};
use crate::transform::reverse_punctuation;

/// Clicks this soon after a popup appeared belong to the gesture that
/// opened it.
pub const POPUP_GUARD: Duration = Duration::from_millis(300);

/// A live text selection inside one section of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub key: String,
    pub text: String,
    pub range: RangeHandle,
    pub index: usize,
    /// Set when the selection is covered by an existing annotation.
    pub annotated: bool,
    pub rects: Vec<Rect>,
    pub block_text: String,
    pub block_offset: usize,
}

impl Selection {
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Up to `chars` characters of surrounding block text on each side,
    /// whitespace squashed.
    pub fn context(&self, chars: usize) -> (String, String) {
        let block: Vec<char> = self.block_text.chars().collect();
        let offset = self.block_offset.min(block.len());
        let len = self.text.chars().count();
        let end = (offset + len).min(block.len());

        let before: String = block[offset.saturating_sub(chars)..offset].iter().collect();
        let after: String = block[end..(end + chars).min(block.len())].iter().collect();
        (squash(&before), squash(&after))
    }
}

fn squash(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointerOutcome {
    Selected(Selection),
    Dismiss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// No popup was open; the click is free for other consumers.
    Ignored,
    /// The click landed inside the guard window and was swallowed.
    Swallowed,
    /// The popup should be closed and the native selection cleared.
    Dismiss,
}

/// Turns native selections into [`Selection`] values and guards popup
/// dismissal against the click that opened it.
#[derive(Debug)]
pub struct TextSelector {
    book_id: String,
    excluded_tags: Vec<&'static str>,
    vertical: bool,
    popup_visible: bool,
    popup_shown_at: Option<Instant>,
}

impl TextSelector {
    pub fn new(book_id: impl Into<String>, language: Option<&str>, vertical: bool) -> Self {
        // Ruby annotations would otherwise leak readings into the text.
        let excluded_tags = match language {
            Some(lang) if lang.to_ascii_lowercase().starts_with("ja") => vec!["rt"],
            _ => Vec::new(),
        };
        Self {
            book_id: book_id.into(),
            excluded_tags,
            vertical,
            popup_visible: false,
            popup_shown_at: None,
        }
    }

    pub fn set_vertical(&mut self, vertical: bool) {
        self.vertical = vertical;
    }

    pub fn is_popup_visible(&self) -> bool {
        self.popup_visible
    }

    pub fn extract_text(&self, selection: &NativeSelection) -> String {
        let text: String = selection
            .fragments
            .iter()
            .filter(|f| !self.excluded_tags.iter().any(|tag| f.parent_tag.eq_ignore_ascii_case(tag)))
            .map(|f| f.text.as_str())
            .collect();
        if self.vertical {
            reverse_punctuation(&text)
        } else {
            text
        }
    }

    pub fn handle_pointer_up(&self, event: &PointerUp) -> PointerOutcome {
        let Some(native) = event.selection.as_ref().filter(|s| !s.is_empty()) else {
            return PointerOutcome::Dismiss;
        };
        let text = self.extract_text(native);
        if text.trim().is_empty() {
            return PointerOutcome::Dismiss;
        }
        debug!("Selection in section {} of {}", event.index, self.book_id);
        PointerOutcome::Selected(Selection {
            key: self.book_id.clone(),
            text,
            range: native.range.clone(),
            index: event.index,
            annotated: false,
            rects: native.rects.clone(),
            block_text: native.block_text.clone(),
            block_offset: native.block_offset,
        })
    }

    pub fn handle_scroll(&self) -> PointerOutcome {
        PointerOutcome::Dismiss
    }

    /// Records popup visibility; the guard window starts when it appears.
    pub fn handle_show_popup(&mut self, visible: bool, now: Instant) {
        self.popup_visible = visible;
        if visible {
            self.popup_shown_at = Some(now);
        }
    }

    pub fn handle_single_click(&mut self, now: Instant) -> ClickOutcome {
        if !self.popup_visible {
            return ClickOutcome::Ignored;
        }
        let shown_at = self.popup_shown_at.unwrap_or(now);
        if now.saturating_duration_since(shown_at) < POPUP_GUARD {
            return ClickOutcome::Swallowed;
        }
        self.popup_visible = false;
        ClickOutcome::Dismiss
    }
}
