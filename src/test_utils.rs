//! In-memory doubles for the surface and the external services.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{Result, anyhow, bail};
use chrono::Utc;

use crate::annotation::{Annotation, AnnotationPatch, Lifecycle, NewAnnotation};
use crate::event_source::{
    FrameMessage, FrameMessageKind, KeyCode, KeyEvent, KeyModifiers, NativeKey, ReaderEvent,
    SimulatedEventSource,
};
use crate::overlay::DrawPrimitive;
use crate::services::{
    AssistantBridge, BookStatus, Clipboard, ExplainMode, NoteDraft, NoteService, StatusStore,
};
use crate::surface::{
    BookDocument, LayoutSnapshot, Renderer, RendererMetrics, RenderingSurface, SectionContents,
    SurfaceEvent, SurfaceFactory, TextDirection,
};
use crate::transform::ContentPipeline;

/// One observable call into a [`MockSurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Open(String),
    Init(Option<String>),
    GoTo(String),
    GoToFraction(f64),
    Prev(Option<f64>),
    Next(Option<f64>),
    GoLeft,
    GoRight,
    Deselect,
    HistoryBack,
    HistoryForward,
    Reload,
    ClearSearch,
    AddAnnotation(String),
    RemoveAnnotation(String),
    DrawOverlay { key: String, index: usize },
    SetContentTransform(ContentPipeline),
    BindFrameListeners(u64),
    MountFonts { index: usize, cjk: bool },
    ApplyFixedLayoutStyles(usize),
    SetAttribute(String, String),
    RemoveAttribute(String),
    SetStyles(String),
    Close,
}

pub type Journal = Rc<RefCell<Vec<SurfaceCall>>>;

/// Surface double that records every call. It is its own renderer.
#[derive(Debug, Clone, Default)]
pub struct MockSurface {
    pub calls: Vec<SurfaceCall>,
    /// Mirror of `calls` shared with the factory that built this surface.
    pub journal: Option<Journal>,
    pub metrics: RendererMetrics,
    pub probe: Option<LayoutSnapshot>,
    pub dir: Option<TextDirection>,
    /// Location token returned by `get_cfi` per range handle.
    pub cfis: HashMap<u64, String>,
    pub overlays: Vec<(String, usize, DrawPrimitive)>,
    pub contents: Vec<SectionContents>,
    pub attributes: HashMap<String, String>,
    pub fail_open: bool,
    pub fail_init: bool,
    pub fail_styles: bool,
    pub fail_fonts: bool,
}

impl MockSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, call: SurfaceCall) {
        if let Some(journal) = &self.journal {
            journal.borrow_mut().push(call.clone());
        }
        self.calls.push(call);
    }
}

impl Renderer for MockSurface {
    fn set_attribute(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
        self.record(SurfaceCall::SetAttribute(name.to_string(), value.to_string()));
    }

    fn remove_attribute(&mut self, name: &str) {
        self.attributes.remove(name);
        self.record(SurfaceCall::RemoveAttribute(name.to_string()));
    }

    fn set_styles(&mut self, css: &str) -> Result<()> {
        if self.fail_styles {
            bail!("renderer rejected styles");
        }
        self.record(SurfaceCall::SetStyles(css.to_string()));
        Ok(())
    }

    fn metrics(&self) -> RendererMetrics {
        self.metrics
    }

    fn layout_probe(&self) -> Option<LayoutSnapshot> {
        self.probe
    }
}

impl RenderingSurface for MockSurface {
    fn open(&mut self, book: &BookDocument) -> Result<()> {
        self.record(SurfaceCall::Open(book.title.clone()));
        if self.fail_open {
            bail!("corrupt archive");
        }
        self.dir = book.dir;
        Ok(())
    }

    fn init(&mut self, last_location: Option<&str>) -> Result<()> {
        self.record(SurfaceCall::Init(last_location.map(str::to_string)));
        if self.fail_init {
            bail!("location not found");
        }
        Ok(())
    }

    fn go_to(&mut self, target: &str) -> Result<()> {
        self.record(SurfaceCall::GoTo(target.to_string()));
        Ok(())
    }

    fn go_to_fraction(&mut self, fraction: f64) -> Result<()> {
        self.record(SurfaceCall::GoToFraction(fraction));
        if self.fail_init {
            bail!("no sections");
        }
        Ok(())
    }

    fn prev(&mut self, distance: Option<f64>) {
        self.record(SurfaceCall::Prev(distance));
    }

    fn next(&mut self, distance: Option<f64>) {
        self.record(SurfaceCall::Next(distance));
    }

    fn go_left(&mut self) {
        self.record(SurfaceCall::GoLeft);
    }

    fn go_right(&mut self) {
        self.record(SurfaceCall::GoRight);
    }

    fn get_cfi(&self, _index: usize, range: &crate::surface::RangeHandle) -> Option<String> {
        self.cfis.get(&range.0).cloned()
    }

    fn deselect(&mut self) {
        self.record(SurfaceCall::Deselect);
    }

    fn history_back(&mut self) {
        self.record(SurfaceCall::HistoryBack);
    }

    fn history_forward(&mut self) {
        self.record(SurfaceCall::HistoryForward);
    }

    fn reload(&mut self) {
        self.record(SurfaceCall::Reload);
    }

    fn clear_search(&mut self) {
        self.record(SurfaceCall::ClearSearch);
    }

    fn renderer_mut(&mut self) -> &mut dyn Renderer {
        self
    }

    fn renderer(&self) -> &dyn Renderer {
        self
    }

    fn contents(&self) -> Vec<SectionContents> {
        self.contents.clone()
    }

    fn add_annotation(&mut self, annotation: &Annotation) {
        self.record(SurfaceCall::AddAnnotation(annotation.cfi.clone()));
    }

    fn remove_annotation(&mut self, cfi: &str) {
        self.record(SurfaceCall::RemoveAnnotation(cfi.to_string()));
    }

    fn draw_overlay(&mut self, key: &str, index: usize, primitive: DrawPrimitive) {
        self.record(SurfaceCall::DrawOverlay {
            key: key.to_string(),
            index,
        });
        self.overlays.push((key.to_string(), index, primitive));
    }

    fn set_content_transform(&mut self, pipeline: ContentPipeline) {
        self.record(SurfaceCall::SetContentTransform(pipeline));
    }

    fn bind_frame_listeners(&mut self, doc_id: u64, _index: usize) {
        self.record(SurfaceCall::BindFrameListeners(doc_id));
    }

    fn mount_fonts(&mut self, index: usize, cjk: bool) -> Result<()> {
        self.record(SurfaceCall::MountFonts { index, cjk });
        if self.fail_fonts {
            bail!("font file missing");
        }
        Ok(())
    }

    fn apply_fixed_layout_styles(&mut self, index: usize) {
        self.record(SurfaceCall::ApplyFixedLayoutStyles(index));
    }

    fn book_dir(&self) -> Option<TextDirection> {
        self.dir
    }

    fn close(&mut self) {
        self.record(SurfaceCall::Close);
    }
}

/// Hands out clones of `template` that report into a shared journal.
#[derive(Debug, Default)]
pub struct MockSurfaceFactory {
    pub template: MockSurface,
    pub fail: bool,
    pub created: usize,
    pub journal: Journal,
}

impl MockSurfaceFactory {
    /// Every call made on surfaces built by this factory, in order.
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.journal.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.journal.borrow_mut().clear();
    }
}

impl SurfaceFactory for MockSurfaceFactory {
    fn create(&mut self, book_id: &str) -> Result<Box<dyn RenderingSurface>> {
        if self.fail {
            return Err(anyhow!("no surface for {book_id}"));
        }
        self.created += 1;
        let mut surface = self.template.clone();
        surface.journal = Some(Rc::clone(&self.journal));
        Ok(Box::new(surface))
    }
}

#[derive(Debug, Default)]
pub struct MemoryNoteService {
    pub notes: Vec<Annotation>,
    pub updated: Vec<(String, AnnotationPatch)>,
    pub deleted: Vec<String>,
    pub drafts: Vec<NoteDraft>,
    pub fail: bool,
}

impl NoteService for MemoryNoteService {
    fn create_note(&mut self, payload: NewAnnotation) -> Result<Annotation> {
        if self.fail {
            bail!("note service unavailable");
        }
        let now = Utc::now();
        let annotation = Annotation {
            id: format!("note-{}", self.notes.len() + 1),
            book_id: payload.book_id,
            kind: payload.kind,
            cfi: payload.cfi,
            style: payload.style,
            color: payload.color,
            text: payload.text,
            note: payload.note,
            context: payload.context,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
        };
        self.notes.push(annotation.clone());
        Ok(annotation)
    }

    fn update_note(&mut self, id: &str, patch: &AnnotationPatch) -> Result<Annotation> {
        if self.fail {
            bail!("note service unavailable");
        }
        let note = self
            .notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| anyhow!("unknown note {id}"))?;
        patch.apply(note, Utc::now());
        self.updated.push((id.to_string(), patch.clone()));
        Ok(note.clone())
    }

    fn delete_note(&mut self, id: &str) -> Result<()> {
        if self.fail {
            bail!("note service unavailable");
        }
        self.deleted.push(id.to_string());
        Ok(())
    }

    fn open_note_draft(&mut self, draft: NoteDraft) -> Result<()> {
        if self.fail {
            bail!("note editor unavailable");
        }
        self.drafts.push(draft);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingAssistant {
    pub explained: Vec<(String, ExplainMode)>,
    pub asked: Vec<(String, String)>,
}

impl AssistantBridge for RecordingAssistant {
    fn send_explain_request(&mut self, text: &str, mode: ExplainMode, _book_id: &str) {
        self.explained.push((text.to_string(), mode));
    }

    fn send_ask_ai_request(&mut self, text: &str, query: &str, _book_id: &str) {
        self.asked.push((text.to_string(), query.to_string()));
    }
}

#[derive(Debug, Default)]
pub struct RecordingClipboard {
    pub texts: Vec<String>,
    pub fail: bool,
}

impl Clipboard for RecordingClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        if self.fail {
            bail!("clipboard locked");
        }
        self.texts.push(text.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    pub statuses: HashMap<String, BookStatus>,
    pub updates: usize,
    pub fail: bool,
}

impl StatusStore for MemoryStatusStore {
    fn get_status(&self, book_id: &str) -> Result<Option<BookStatus>> {
        if self.fail {
            bail!("status store offline");
        }
        Ok(self.statuses.get(book_id).cloned())
    }

    fn update_status(&mut self, book_id: &str, status: &BookStatus) -> Result<()> {
        if self.fail {
            bail!("status store offline");
        }
        self.statuses.insert(book_id.to_string(), status.clone());
        self.updates += 1;
        Ok(())
    }
}

/// Builder for a scripted sequence of reader events.
#[derive(Debug, Default)]
pub struct ScenarioBuilder {
    book_id: String,
    events: Vec<ReaderEvent>,
}

impl ScenarioBuilder {
    pub fn new(book_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            events: Vec::new(),
        }
    }

    pub fn press_char(mut self, c: char) -> Self {
        self.events.push(SimulatedEventSource::char_key(c));
        self
    }

    pub fn press(mut self, code: KeyCode, modifiers: KeyModifiers) -> Self {
        self.events
            .push(ReaderEvent::Key(KeyEvent::new(code, modifiers)));
        self
    }

    /// Scroll down n times (press 'j' n times)
    pub fn scroll_down(mut self, times: usize) -> Self {
        for _ in 0..times {
            self.events.push(SimulatedEventSource::char_key('j'));
        }
        self
    }

    pub fn click(mut self, screen_x: f64) -> Self {
        self.events
            .push(SimulatedEventSource::single_click(&self.book_id, screen_x));
        self
    }

    pub fn wheel(mut self, delta_y: f64) -> Self {
        self.events.push(ReaderEvent::Message(FrameMessage::new(
            self.book_id.clone(),
            FrameMessageKind::Wheel { delta_y },
        )));
        self
    }

    pub fn volume(mut self, key: NativeKey) -> Self {
        self.events.push(ReaderEvent::NativeKey(key));
        self
    }

    pub fn resize(mut self) -> Self {
        self.events.push(ReaderEvent::ResizeUpdate {
            book_ids: vec![self.book_id.clone()],
        });
        self
    }

    pub fn surface(mut self, event: SurfaceEvent) -> Self {
        self.events.push(ReaderEvent::Surface(event));
        self
    }

    pub fn events(self) -> Vec<ReaderEvent> {
        self.events
    }

    pub fn build(self) -> SimulatedEventSource {
        SimulatedEventSource::new(self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_builder() {
        let events = ScenarioBuilder::new("b1")
            .scroll_down(2)
            .click(10.0)
            .wheel(-3.0)
            .resize()
            .events();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[4],
            ReaderEvent::ResizeUpdate {
                book_ids: vec!["b1".to_string()]
            }
        );
    }

    #[test]
    fn test_factory_reports_into_caller_journal() {
        let journal = Journal::default();
        let mut factory = MockSurfaceFactory {
            journal: Rc::clone(&journal),
            ..Default::default()
        };
        factory.create("b1").unwrap().go_left();
        assert_eq!(*journal.borrow(), vec![SurfaceCall::GoLeft]);
    }

    #[test]
    fn test_factory_surfaces_share_journal() {
        let mut factory = MockSurfaceFactory::default();
        let mut surface = factory.create("b1").unwrap();
        surface.go_right();
        surface.renderer_mut().set_attribute("flow", "scrolled");
        assert_eq!(
            factory.calls(),
            vec![
                SurfaceCall::GoRight,
                SurfaceCall::SetAttribute("flow".into(), "scrolled".into())
            ]
        );
    }
}
