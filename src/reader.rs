//! One open book: the viewer plus the components that react to its events.
//!
//! A [`ReaderPane`] owns everything that belongs to a single book, so
//! several books can be open side by side without sharing state. The host
//! loop feeds it [`ReaderEvent`]s and calls [`ReaderPane::tick`] whenever
//! [`ReaderPane::next_deadline`] passes.

use std::time::Instant;

use log::{debug, warn};

use crate::annotation::{Annotation, HighlightColor, HighlightStyle};
use crate::annotator::Annotator;
use crate::autosave::ProgressAutosave;
use crate::error::ViewerError;
use crate::event_router::{self, EventRouter, ListenerTarget};
use crate::event_source::{FrameMessage, FrameMessageKind, KeyEvent, ReaderEvent};
use crate::notification::NotificationManager;
use crate::pagination::{PaginationController, Side};
use crate::selection::{ClickOutcome, PointerOutcome, TextSelector};
use crate::services::{AssistantBridge, Clipboard, ExplainMode, NoteService, StatusStore};
use crate::settings::{ReadSettings, ThemePalette, ViewSettings, ViewSettingsPatch};
use crate::shortcuts::{self, PopupAction, ShortcutEffect};
use crate::surface::{Insets, Size, SurfaceEvent, SurfaceFactory};
use crate::viewer::{
    LayoutStableCallback, ProgressCallback, ProgressRecord, ViewSettingsCallback, Viewer,
    ViewerConfig,
};

/// Collaborators borrowed for the duration of one call.
pub struct Services<'a> {
    pub notes: &'a mut dyn NoteService,
    pub assistant: &'a mut dyn AssistantBridge,
    pub status: &'a mut dyn StatusStore,
    pub clipboard: &'a mut dyn Clipboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaneHandler {
    DrawAnnotation,
    ShowAnnotation,
    PointerUp,
    Scroll,
    Message,
    Keyboard,
}

/// What the viewer reported through its callbacks.
#[derive(Debug)]
enum ViewerNotice {
    Progress(ProgressRecord),
    ViewSettings(ViewSettings),
    LayoutStable(Vec<String>),
}

pub struct ReaderPane {
    book_id: String,
    viewer: Viewer,
    pagination: PaginationController,
    selector: TextSelector,
    annotator: Annotator,
    autosave: ProgressAutosave,
    router: EventRouter<PaneHandler>,
    notifications: NotificationManager,
    notices: flume::Receiver<ViewerNotice>,
    on_progress: Option<ProgressCallback>,
    on_view_settings: Option<ViewSettingsCallback>,
    on_layout_stable: Option<LayoutStableCallback>,
    destroyed: bool,
}

impl std::fmt::Debug for ReaderPane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderPane")
            .field("book_id", &self.book_id)
            .field("viewer", &self.viewer)
            .field("annotator", &self.annotator.phase())
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl ReaderPane {
    /// Creates the surface and shows the book.
    pub fn open(
        config: ViewerConfig,
        annotations: Vec<Annotation>,
        read: ReadSettings,
        factory: &mut dyn SurfaceFactory,
    ) -> Result<Self, ViewerError> {
        let book_id = config.book_id.clone();
        let language = config.book.language.clone();
        let container = config.container;

        let (tx, notices) = flume::unbounded();
        let mut viewer = Viewer::new(config);
        let progress_tx = tx.clone();
        viewer.set_progress_callback(Box::new(move |record, _| {
            if progress_tx.send(ViewerNotice::Progress(record.clone())).is_err() {
                warn!("Dropped progress update");
            }
        }));
        let settings_tx = tx.clone();
        viewer.set_view_settings_callback(Box::new(move |settings| {
            if settings_tx.send(ViewerNotice::ViewSettings(settings.clone())).is_err() {
                warn!("Dropped view settings update");
            }
        }));
        viewer.set_layout_stable_callback(Box::new(move |book_ids| {
            if tx.send(ViewerNotice::LayoutStable(book_ids.to_vec())).is_err() {
                warn!("Dropped layout stable notification");
            }
        }));
        viewer.initialize(factory)?;

        let vertical = viewer.view_settings().vertical;
        let mut pagination = PaginationController::new(book_id.clone());
        pagination.set_pane_bounds(0.0, container.width);
        let mut annotator = Annotator::new(book_id.clone(), annotations, read);
        annotator.set_pane(viewer.dimensions(), vertical);

        let mut router = EventRouter::new();
        router.add_event_listener(event_router::DRAW_ANNOTATION, PaneHandler::DrawAnnotation);
        router.add_event_listener(event_router::SHOW_ANNOTATION, PaneHandler::ShowAnnotation);
        router.add_event_listener(event_router::SCROLL, PaneHandler::Scroll);
        router.add_document_listener(event_router::POINTER_UP, PaneHandler::PointerUp);
        router.add_document_listener(event_router::KEY_DOWN, PaneHandler::Keyboard);
        router.add_window_listener(event_router::MESSAGE, PaneHandler::Message);

        let mut pane = Self {
            selector: TextSelector::new(book_id.clone(), language.as_deref(), vertical),
            autosave: ProgressAutosave::new(book_id.clone()),
            book_id,
            viewer,
            pagination,
            annotator,
            router,
            notifications: NotificationManager::new(),
            notices,
            on_progress: None,
            on_view_settings: None,
            on_layout_stable: None,
            destroyed: false,
        };
        pane.drain_notices(None, Instant::now());
        Ok(pane)
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    pub fn selector(&self) -> &TextSelector {
        &self.selector
    }

    pub fn pagination(&self) -> &PaginationController {
        &self.pagination
    }

    pub fn autosave(&self) -> &ProgressAutosave {
        &self.autosave
    }

    pub fn notifications(&self) -> &NotificationManager {
        &self.notifications
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.on_progress = Some(callback);
    }

    pub fn set_view_settings_callback(&mut self, callback: ViewSettingsCallback) {
        self.on_view_settings = Some(callback);
    }

    pub fn set_layout_stable_callback(&mut self, callback: LayoutStableCallback) {
        self.on_layout_stable = Some(callback);
    }

    /// Inactive panes ignore navigation input.
    pub fn set_active(&mut self, active: bool) {
        self.pagination.set_active(active);
    }

    /// Horizontal extent of the pane in click coordinates.
    pub fn set_pane_bounds(&mut self, left: f64, width: f64) {
        self.pagination.set_pane_bounds(left, width);
    }

    pub fn handle_event(&mut self, event: &ReaderEvent, services: &mut Services<'_>, now: Instant) {
        if self.destroyed {
            return;
        }
        self.viewer.handle_event(event, now);
        self.drain_notices(Some(&mut *services.status), now);

        let (target, name) = event.route();
        for handler in self.router.handlers(target, name) {
            match (handler, event) {
                (PaneHandler::DrawAnnotation, ReaderEvent::Surface(SurfaceEvent::DrawAnnotation(request))) => {
                    if let Some((surface, settings)) = self.viewer.surface_and_settings() {
                        self.annotator.on_draw_annotation(request, surface, settings);
                    }
                }
                (PaneHandler::ShowAnnotation, ReaderEvent::Surface(SurfaceEvent::ShowAnnotation(show))) => {
                    self.annotator.on_show_annotation(show);
                    self.sync_popup(now);
                }
                (PaneHandler::PointerUp, ReaderEvent::Surface(SurfaceEvent::PointerUp(pointer))) => {
                    let outcome = self.selector.handle_pointer_up(pointer);
                    self.apply_pointer_outcome(outcome, now);
                }
                (PaneHandler::Scroll, ReaderEvent::Surface(SurfaceEvent::Scroll)) => {
                    if self.annotator.is_popup_visible() {
                        let outcome = self.selector.handle_scroll();
                        self.apply_pointer_outcome(outcome, now);
                    }
                }
                (PaneHandler::Message, ReaderEvent::Message(message)) => {
                    self.handle_message(message, services, now);
                }
                (PaneHandler::Keyboard, ReaderEvent::Key(key)) => self.handle_key(key, services, now),
                (PaneHandler::Keyboard, ReaderEvent::NativeKey(key)) => {
                    if let Some((surface, settings)) = self.viewer.surface_and_settings() {
                        self.pagination.handle_native_key(surface, settings, *key);
                    }
                }
                _ => {}
            }
        }
    }

    fn apply_pointer_outcome(&mut self, outcome: PointerOutcome, now: Instant) {
        match outcome {
            PointerOutcome::Selected(selection) => self.annotator.on_selection(selection),
            PointerOutcome::Dismiss => {
                if self.annotator.ask_ai_popup().is_none() {
                    self.annotator.dismiss_popup();
                }
            }
        }
        self.sync_popup(now);
    }

    fn handle_message(&mut self, message: &FrameMessage, services: &mut Services<'_>, now: Instant) {
        if message.book_id != self.book_id {
            return;
        }
        match &message.kind {
            FrameMessageKind::SingleClick { screen_x } => match self.selector.handle_single_click(now) {
                ClickOutcome::Swallowed => debug!("Click swallowed right after popup"),
                ClickOutcome::Dismiss => {
                    if let Some(surface) = self.viewer.get_view_mut() {
                        self.annotator.dismiss_popup_and_selection(surface);
                    }
                }
                ClickOutcome::Ignored => {
                    if let Some((surface, settings)) = self.viewer.surface_and_settings() {
                        self.pagination.handle_single_click(surface, settings, *screen_x);
                    }
                }
            },
            FrameMessageKind::Key(key) => self.handle_key(key, services, now),
            _ => {
                if let Some((surface, settings)) = self.viewer.surface_and_settings() {
                    self.pagination.handle_message(surface, settings, message, now);
                }
            }
        }
    }

    fn handle_key(&mut self, key: &KeyEvent, services: &mut Services<'_>, now: Instant) {
        if self.annotator.popup().is_some() {
            if let Some(action) = shortcuts::popup_action_for(key) {
                self.popup_action(action, services, now);
                return;
            }
        }
        let Some(action) = shortcuts::action_for(key) else {
            return;
        };
        let effect = match self.viewer.surface_and_settings() {
            Some((surface, settings)) => shortcuts::execute(action, &self.pagination, surface, settings),
            None => return,
        };
        match effect {
            ShortcutEffect::None => {}
            ShortcutEffect::UpdateSettings(patch) => self.update_view_settings(&patch, now),
            ShortcutEffect::DismissPopup => self.dismiss_popup(now),
        }
    }

    /// Runs one selection popup button.
    pub fn popup_action(&mut self, action: PopupAction, services: &mut Services<'_>, now: Instant) {
        match action {
            PopupAction::Copy => self.copy_selection(services, now),
            PopupAction::Explain => self.explain(ExplainMode::Explain, services, now),
            PopupAction::AskAi => {
                self.annotator.ask_ai();
                self.sync_popup(now);
            }
            PopupAction::ToggleHighlight => self.toggle_highlight(services, now),
            PopupAction::AddNote => self.create_note(services, now),
        }
    }

    pub fn toggle_highlight(&mut self, services: &mut Services<'_>, now: Instant) {
        if let Some(surface) = self.viewer.get_view_mut() {
            self.annotator
                .toggle_highlight(surface, services.notes, &mut self.notifications, now);
        }
        self.sync_popup(now);
    }

    pub fn update_highlight(
        &mut self,
        style: HighlightStyle,
        color: HighlightColor,
        services: &mut Services<'_>,
        now: Instant,
    ) {
        if let Some(surface) = self.viewer.get_view_mut() {
            self.annotator.update_highlight(
                style,
                color,
                surface,
                services.notes,
                &mut self.notifications,
                now,
            );
        }
        self.sync_popup(now);
    }

    pub fn copy_selection(&mut self, services: &mut Services<'_>, now: Instant) {
        if let Some(surface) = self.viewer.get_view_mut() {
            self.annotator
                .copy(services.clipboard, surface, &mut self.notifications, now);
        }
        self.sync_popup(now);
    }

    pub fn explain(&mut self, mode: ExplainMode, services: &mut Services<'_>, now: Instant) {
        self.annotator.explain(mode, services.assistant);
        self.sync_popup(now);
    }

    pub fn send_ai_query(&mut self, query: &str, services: &mut Services<'_>, now: Instant) {
        if let Some(surface) = self.viewer.get_view_mut() {
            self.annotator.send_ai_query(query, services.assistant, surface);
        }
        self.sync_popup(now);
    }

    pub fn close_ask_ai(&mut self, now: Instant) {
        if let Some(surface) = self.viewer.get_view_mut() {
            self.annotator.close_ask_ai(surface);
        }
        self.sync_popup(now);
    }

    pub fn create_note(&mut self, services: &mut Services<'_>, now: Instant) {
        if let Some(surface) = self.viewer.get_view_mut() {
            self.annotator
                .create_note(surface, services.notes, &mut self.notifications, now);
        }
        self.sync_popup(now);
    }

    pub fn dismiss_popup(&mut self, now: Instant) {
        if let Some(surface) = self.viewer.get_view_mut() {
            self.annotator.dismiss_popup_and_selection(surface);
        }
        self.sync_popup(now);
    }

    /// Keeps the click guard in step with the annotator's popups.
    fn sync_popup(&mut self, now: Instant) {
        let visible = self.annotator.is_popup_visible();
        if visible != self.selector.is_popup_visible() {
            self.selector.handle_show_popup(visible, now);
        }
    }

    pub fn paginate(&mut self, side: Side) {
        if let Some((surface, settings)) = self.viewer.surface_and_settings() {
            self.pagination.paginate(surface, settings, side);
        }
    }

    pub fn go_to(&mut self, target: &str) {
        if let Some(surface) = self.viewer.get_view_mut() {
            if let Err(e) = surface.go_to(target) {
                warn!("Failed to navigate to {target}: {e:#}");
            }
        }
    }

    pub fn update_view_settings(&mut self, patch: &ViewSettingsPatch, now: Instant) {
        self.viewer.update_view_settings(patch, now);
        self.sync_direction();
    }

    pub fn update_theme(&mut self, palette: ThemePalette, now: Instant) {
        self.viewer.update_theme(palette, now);
    }

    pub fn update_insets(&mut self, insets: Insets) {
        self.viewer.update_insets(insets);
        self.sync_direction();
    }

    pub fn update_container(&mut self, container: Size) {
        self.viewer.update_container(container);
        self.sync_direction();
    }

    pub fn refresh(&mut self, now: Instant) {
        self.viewer.refresh(now);
        self.drain_notices(None, now);
    }

    fn sync_direction(&mut self) {
        let vertical = self.viewer.view_settings().vertical;
        self.selector.set_vertical(vertical);
        self.annotator.set_pane(self.viewer.dimensions(), vertical);
    }

    fn drain_notices(&mut self, mut status: Option<&mut dyn StatusStore>, now: Instant) {
        while let Ok(notice) = self.notices.try_recv() {
            match notice {
                ViewerNotice::Progress(record) => {
                    if let Some(surface) = self.viewer.get_view_mut() {
                        self.annotator.reconcile_visible(&record, surface);
                        self.pagination.on_relocate(surface, now);
                    }
                    match status.as_deref_mut() {
                        Some(store) => self.autosave.request_save(&record, store, now),
                        None => warn!("Progress for {} arrived without a status store", self.book_id),
                    }
                    if let Some(callback) = self.on_progress.as_mut() {
                        callback(&record, &self.book_id);
                    }
                }
                ViewerNotice::ViewSettings(settings) => {
                    self.sync_direction();
                    if let Some(callback) = self.on_view_settings.as_mut() {
                        callback(&settings);
                    }
                }
                ViewerNotice::LayoutStable(book_ids) => {
                    if let Some(callback) = self.on_layout_stable.as_mut() {
                        callback(&book_ids);
                    }
                }
            }
        }
    }

    /// Fires every due timer. Returns true if anything fired.
    pub fn tick(&mut self, status: &mut dyn StatusStore, now: Instant) -> bool {
        if self.destroyed {
            return false;
        }
        let mut fired = self.viewer.tick(now);
        self.drain_notices(Some(&mut *status), now);
        if let Some(surface) = self.viewer.get_view_mut() {
            fired |= self.pagination.tick(surface, now);
        }
        fired |= self.autosave.tick(status, now);
        fired |= self.notifications.update(now);
        fired
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.viewer.next_deadline(),
            self.pagination.next_deadline(),
            self.autosave.next_deadline(),
            self.notifications.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Flushes pending progress and releases the surface. Safe to call more
    /// than once.
    pub fn destroy(&mut self, status: &mut dyn StatusStore, now: Instant) {
        if self.destroyed {
            return;
        }
        self.autosave.flush(status, now);
        self.pagination.cancel();
        self.router.destroy();
        self.viewer.destroy();
        self.destroyed = true;
    }
}

/// The panes of every open book, keyed by book id.
#[derive(Debug, Default)]
pub struct ReaderPanes {
    panes: Vec<ReaderPane>,
}

impl ReaderPanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pane, replacing (and destroying) any pane of the same book.
    pub fn insert(&mut self, pane: ReaderPane, status: &mut dyn StatusStore, now: Instant) {
        self.remove(pane.book_id(), status, now);
        self.panes.push(pane);
    }

    pub fn remove(&mut self, book_id: &str, status: &mut dyn StatusStore, now: Instant) -> bool {
        let Some(position) = self.panes.iter().position(|p| p.book_id() == book_id) else {
            return false;
        };
        let mut pane = self.panes.remove(position);
        pane.destroy(status, now);
        true
    }

    pub fn get(&self, book_id: &str) -> Option<&ReaderPane> {
        self.panes.iter().find(|p| p.book_id() == book_id)
    }

    pub fn get_mut(&mut self, book_id: &str) -> Option<&mut ReaderPane> {
        self.panes.iter_mut().find(|p| p.book_id() == book_id)
    }

    pub fn len(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    /// Delivers a host-level event (resize, cross-context message, key) to
    /// every pane; each pane filters by its own book id.
    pub fn broadcast(&mut self, event: &ReaderEvent, services: &mut Services<'_>, now: Instant) {
        let (target, _) = event.route();
        if target == ListenerTarget::Surface {
            warn!("Surface events must be sent to their own pane");
            return;
        }
        for pane in &mut self.panes {
            pane.handle_event(event, services, now);
        }
    }

    pub fn tick(&mut self, status: &mut dyn StatusStore, now: Instant) -> bool {
        let mut fired = false;
        for pane in &mut self.panes {
            fired |= pane.tick(status, now);
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.panes.iter().filter_map(ReaderPane::next_deadline).min()
    }

    pub fn destroy_all(&mut self, status: &mut dyn StatusStore, now: Instant) {
        for mut pane in self.panes.drain(..) {
            pane.destroy(status, now);
        }
    }
}
