//! Selection popups and the annotation lifecycle of one open book.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::Utc;
use log::{debug, error, warn};

use crate::annotation::{
    Annotation, AnnotationKind, AnnotationPatch, AnnotationSet, HighlightColor, HighlightStyle,
    NewAnnotation, NoteContext,
};
use crate::cfi;
use crate::notification::NotificationManager;
use crate::overlay;
use crate::popup::{self, PopupGeometry};
use crate::selection::Selection;
use crate::services::{AssistantBridge, Clipboard, ExplainMode, NoteDraft, NoteService};
use crate::settings::{ReadSettings, ViewSettings};
use crate::surface::{DrawRequest, RenderingSurface, ShowAnnotation, Size};
use crate::viewer::ProgressRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotatorPhase {
    None,
    Selected,
    PopupOpen,
    Highlighting,
    AskingAi,
    Closed,
}

/// Owns the annotation list of a book and the popup state of its current
/// selection. Collaborators are borrowed per call.
#[derive(Debug)]
pub struct Annotator {
    book_id: String,
    annotations: AnnotationSet,
    read: ReadSettings,
    pane: Size,
    vertical: bool,
    phase: AnnotatorPhase,
    selection: Option<Selection>,
    popup: Option<PopupGeometry>,
    ask_ai_popup: Option<PopupGeometry>,
    options_visible: bool,
    selected_style: HighlightStyle,
    selected_color: HighlightColor,
    drawn: BTreeSet<String>,
    last_copied_text: Option<String>,
}

impl Annotator {
    pub fn new(book_id: impl Into<String>, annotations: Vec<Annotation>, read: ReadSettings) -> Self {
        let selected_style = read.highlight_style;
        let selected_color = read.color_for(selected_style);
        Self {
            book_id: book_id.into(),
            annotations: AnnotationSet::from_vec(annotations),
            read,
            pane: Size::default(),
            vertical: false,
            phase: AnnotatorPhase::None,
            selection: None,
            popup: None,
            ask_ai_popup: None,
            options_visible: false,
            selected_style,
            selected_color,
            drawn: BTreeSet::new(),
            last_copied_text: None,
        }
    }

    pub fn phase(&self) -> AnnotatorPhase {
        self.phase
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn annotations(&self) -> &AnnotationSet {
        &self.annotations
    }

    pub fn read_settings(&self) -> &ReadSettings {
        &self.read
    }

    pub fn popup(&self) -> Option<&PopupGeometry> {
        self.popup.as_ref()
    }

    pub fn ask_ai_popup(&self) -> Option<&PopupGeometry> {
        self.ask_ai_popup.as_ref()
    }

    /// True while either popup is on screen.
    pub fn is_popup_visible(&self) -> bool {
        self.popup.is_some() || self.ask_ai_popup.is_some()
    }

    pub fn options_visible(&self) -> bool {
        self.options_visible
    }

    pub fn selected_style(&self) -> (HighlightStyle, HighlightColor) {
        (self.selected_style, self.selected_color)
    }

    /// Annotations currently attached to the surface.
    pub fn drawn(&self) -> impl Iterator<Item = &str> {
        self.drawn.iter().map(String::as_str)
    }

    pub fn last_copied_text(&self) -> Option<&str> {
        self.last_copied_text.as_deref()
    }

    /// Pane size and writing mode used for popup geometry.
    pub fn set_pane(&mut self, pane: Size, vertical: bool) {
        if self.pane == pane && self.vertical == vertical {
            return;
        }
        self.pane = pane;
        self.vertical = vertical;
        if self.popup.is_some() {
            self.layout_popup();
        }
    }

    pub fn on_selection(&mut self, selection: Selection) {
        if self.ask_ai_popup.is_some() {
            debug!("Ignoring selection while the ask-AI popup is open");
            return;
        }
        self.options_visible = selection.annotated;
        self.selection = Some(selection);
        self.phase = AnnotatorPhase::Selected;
        self.layout_popup();
    }

    fn layout_popup(&mut self) {
        let Some(selection) = self.selection.as_ref().filter(|s| s.has_text()) else {
            self.popup = None;
            return;
        };
        self.popup = popup::annotation_popup_geometry(
            &selection.rects,
            self.pane,
            self.vertical,
            self.options_visible,
        );
        if self.popup.is_some() {
            if self.phase == AnnotatorPhase::Selected {
                self.phase = AnnotatorPhase::PopupOpen;
            }
        } else {
            debug!("Degenerate selection geometry, popup skipped");
        }
    }

    pub fn dismiss_popup(&mut self) {
        self.selection = None;
        self.popup = None;
        self.ask_ai_popup = None;
        self.options_visible = false;
        self.phase = AnnotatorPhase::Closed;
    }

    pub fn dismiss_popup_and_selection(&mut self, surface: &mut dyn RenderingSurface) {
        self.dismiss_popup();
        surface.deselect();
    }

    fn hide_annotation_popup(&mut self) {
        self.popup = None;
        self.options_visible = false;
    }

    fn selected_text(&self) -> Option<String> {
        self.selection
            .as_ref()
            .filter(|s| s.has_text())
            .map(|s| s.text.clone())
    }

    pub fn copy(
        &mut self,
        clipboard: &mut dyn Clipboard,
        surface: &mut dyn RenderingSurface,
        notifications: &mut NotificationManager,
        now: Instant,
    ) {
        let Some(text) = self.selected_text() else {
            return;
        };
        match clipboard.set_text(&text) {
            Ok(()) => notifications.success("Copied to clipboard", now),
            Err(e) => {
                warn!("{e:#}");
                notifications.error("Failed to copy to clipboard", now);
            }
        }
        self.last_copied_text = Some(text);
        self.dismiss_popup_and_selection(surface);
    }

    /// Records a new default style and color, then restyles the selected
    /// annotation.
    pub fn update_highlight(
        &mut self,
        style: HighlightStyle,
        color: HighlightColor,
        surface: &mut dyn RenderingSurface,
        notes: &mut dyn NoteService,
        notifications: &mut NotificationManager,
        now: Instant,
    ) {
        self.selected_style = style;
        self.selected_color = color;
        self.read.highlight_style = style;
        self.read.highlight_colors.insert(style, color);
        self.highlight(true, surface, notes, notifications, now);
    }

    /// Creates a highlight for the selection, or deletes the one already there.
    pub fn toggle_highlight(
        &mut self,
        surface: &mut dyn RenderingSurface,
        notes: &mut dyn NoteService,
        notifications: &mut NotificationManager,
        now: Instant,
    ) {
        self.highlight(false, surface, notes, notifications, now);
    }

    fn highlight(
        &mut self,
        update: bool,
        surface: &mut dyn RenderingSurface,
        notes: &mut dyn NoteService,
        notifications: &mut NotificationManager,
        now: Instant,
    ) {
        let Some(selection) = self.selection.clone().filter(|s| s.has_text()) else {
            return;
        };
        let Some(cfi) = surface.get_cfi(selection.index, &selection.range) else {
            warn!("No location for selection in section {}", selection.index);
            return;
        };

        self.phase = AnnotatorPhase::Highlighting;
        let style = self.read.highlight_style;
        let color = self.read.color_for(style);

        let existing = self
            .annotations
            .find_active(&cfi)
            .filter(|a| a.kind == AnnotationKind::Annotation)
            .cloned();

        match existing {
            Some(existing) if update => {
                self.restyle(existing, style, color, surface, notes, notifications, now)
            }
            Some(existing) => self.delete(existing, surface, notes, notifications, now),
            None => self.create(&selection, cfi, style, color, surface, notes, notifications, now),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        selection: &Selection,
        cfi: String,
        style: HighlightStyle,
        color: HighlightColor,
        surface: &mut dyn RenderingSurface,
        notes: &mut dyn NoteService,
        notifications: &mut NotificationManager,
        now: Instant,
    ) {
        let (before, after) = selection.context(self.read.note_context_chars);
        let payload = NewAnnotation {
            book_id: self.book_id.clone(),
            kind: AnnotationKind::Annotation,
            cfi,
            style,
            color,
            text: selection.text.clone(),
            note: String::new(),
            context: Some(NoteContext { before, after }),
        };
        match notes.create_note(payload) {
            Ok(annotation) => {
                surface.add_annotation(&annotation);
                self.drawn.insert(annotation.cfi.clone());
                self.annotations.upsert(annotation);
                self.options_visible = true;
                if let Some(current) = self.selection.as_mut() {
                    current.annotated = true;
                }
                self.layout_popup();
                self.phase = AnnotatorPhase::PopupOpen;
            }
            Err(e) => {
                error!("Failed to create annotation: {e:#}");
                notifications.error("Failed to save annotation", now);
                self.options_visible = selection.annotated;
                self.phase = AnnotatorPhase::PopupOpen;
            }
        }
    }

    fn delete(
        &mut self,
        existing: Annotation,
        surface: &mut dyn RenderingSurface,
        notes: &mut dyn NoteService,
        notifications: &mut NotificationManager,
        now: Instant,
    ) {
        let Some(previous) = self.annotations.soft_delete(&existing.id, Utc::now()) else {
            return;
        };
        surface.remove_annotation(&existing.cfi);
        self.drawn.remove(&existing.cfi);

        match notes.delete_note(&existing.id) {
            Ok(()) => {
                self.hide_annotation_popup();
                self.phase = AnnotatorPhase::Closed;
            }
            Err(e) => {
                error!("Failed to delete annotation {}: {e:#}", existing.id);
                notifications.error("Failed to delete annotation", now);
                surface.add_annotation(&previous);
                self.drawn.insert(previous.cfi.clone());
                self.annotations.upsert(previous);
                self.phase = AnnotatorPhase::PopupOpen;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn restyle(
        &mut self,
        existing: Annotation,
        style: HighlightStyle,
        color: HighlightColor,
        surface: &mut dyn RenderingSurface,
        notes: &mut dyn NoteService,
        notifications: &mut NotificationManager,
        now: Instant,
    ) {
        let patch = AnnotationPatch::restyle(style, color);
        let mut local = existing.clone();
        patch.apply(&mut local, Utc::now());
        self.annotations.upsert(local.clone());
        // Erase, then draw again with the new appearance.
        surface.remove_annotation(&local.cfi);
        surface.add_annotation(&local);

        match notes.update_note(&existing.id, &patch) {
            Ok(updated) => {
                self.annotations.upsert(updated);
            }
            Err(e) => {
                error!("Failed to update annotation {}: {e:#}", existing.id);
                notifications.error("Failed to save annotation", now);
                surface.remove_annotation(&existing.cfi);
                surface.add_annotation(&existing);
                self.annotations.upsert(existing);
            }
        }
        self.phase = AnnotatorPhase::PopupOpen;
    }

    pub fn explain(&mut self, mode: ExplainMode, assistant: &mut dyn AssistantBridge) {
        let Some(text) = self.selected_text() else {
            return;
        };
        self.hide_annotation_popup();
        self.phase = AnnotatorPhase::Closed;
        assistant.send_explain_request(&text, mode, &self.book_id);
    }

    /// Swaps the annotation popup for the free-text query popup.
    pub fn ask_ai(&mut self) {
        let Some(selection) = self.selection.as_ref().filter(|s| s.has_text()) else {
            return;
        };
        let geometry = popup::ask_ai_popup_geometry(&selection.rects, self.pane, self.vertical);
        self.hide_annotation_popup();
        match geometry {
            Some(geometry) => {
                self.ask_ai_popup = Some(geometry);
                self.phase = AnnotatorPhase::AskingAi;
            }
            None => self.phase = AnnotatorPhase::Closed,
        }
    }

    pub fn close_ask_ai(&mut self, surface: &mut dyn RenderingSurface) {
        self.ask_ai_popup = None;
        self.phase = AnnotatorPhase::Closed;
        surface.deselect();
    }

    pub fn send_ai_query(
        &mut self,
        query: &str,
        assistant: &mut dyn AssistantBridge,
        surface: &mut dyn RenderingSurface,
    ) {
        let Some(text) = self.selected_text() else {
            return;
        };
        assistant.send_ask_ai_request(&text, query, &self.book_id);
        self.dismiss_popup_and_selection(surface);
    }

    /// Hands the selection and its surrounding text to the note editor.
    pub fn create_note(
        &mut self,
        surface: &mut dyn RenderingSurface,
        notes: &mut dyn NoteService,
        notifications: &mut NotificationManager,
        now: Instant,
    ) {
        let Some(selection) = self.selection.clone().filter(|s| s.has_text()) else {
            return;
        };
        let (before, after) = selection.context(self.read.note_context_chars);
        let draft = NoteDraft {
            book_id: self.book_id.clone(),
            cfi: surface.get_cfi(selection.index, &selection.range),
            quote: selection.text.clone(),
            context: NoteContext { before, after },
        };
        if let Err(e) = notes.open_note_draft(draft) {
            error!("Failed to open note draft: {e:#}");
            notifications.error("Failed to create note", now);
            return;
        }
        self.dismiss_popup_and_selection(surface);
    }

    /// Paints an annotation the surface asked for.
    pub fn on_draw_annotation(
        &self,
        request: &DrawRequest,
        surface: &mut dyn RenderingSurface,
        settings: &ViewSettings,
    ) {
        let Some(annotation) = self.annotations.find_active(&request.cfi) else {
            debug!("Draw request for unknown annotation {}", request.cfi);
            return;
        };
        if let Some(primitive) = overlay::draw(annotation.style, annotation.color, request, settings) {
            surface.draw_overlay(&request.cfi, request.index, primitive);
        }
    }

    /// Re-selects an existing annotation the reader tapped on.
    pub fn on_show_annotation(&mut self, event: &ShowAnnotation) {
        let Some(annotation) = self
            .annotations
            .find_active(&event.cfi)
            .filter(|a| a.kind == AnnotationKind::Annotation)
        else {
            return;
        };
        self.selected_style = annotation.style;
        self.selected_color = annotation.color;
        let selection = Selection {
            key: self.book_id.clone(),
            text: annotation.text.clone(),
            range: event.range.clone(),
            index: event.index,
            annotated: true,
            rects: event.rects.clone(),
            block_text: event.text.clone(),
            block_offset: 0,
        };
        self.on_selection(selection);
    }

    /// Attaches exactly the annotations inside the visible range and detaches
    /// the ones attached by earlier passes that fell out of it.
    pub fn reconcile_visible(&mut self, progress: &ProgressRecord, surface: &mut dyn RenderingSurface) {
        let bounds = cfi::collapse(&progress.location, false)
            .and_then(|start| Ok((start, cfi::collapse(&progress.location, true)?)));
        let (start, end) = match bounds {
            Ok(bounds) => bounds,
            Err(e) => {
                warn!("Cannot reconcile annotations at {:?}: {e}", progress.location);
                return;
            }
        };

        let visible: Vec<Annotation> = self
            .annotations
            .visible_in(&start, &end)
            .into_iter()
            .filter(|a| a.kind == AnnotationKind::Annotation)
            .cloned()
            .collect();
        let keep: BTreeSet<String> = visible.iter().map(|a| a.cfi.clone()).collect();

        for stale in self.drawn.difference(&keep) {
            surface.remove_annotation(stale);
        }
        for annotation in &visible {
            surface.add_annotation(annotation);
        }
        self.drawn = keep;
    }
}
