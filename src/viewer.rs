//! Lifecycle of one rendering surface: creation, document opening, style
//! and layout upkeep, relocation normalization and teardown.

use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::error::ViewerError;
use crate::event_router::{EventRouter, GlobalHandlers, SurfaceHandlers};
use crate::event_source::{FrameMessage, FrameMessageKind, ReaderEvent};
use crate::settings::{ThemePalette, ViewSettings, ViewSettingsPatch};
use crate::stability::LayoutStabilityDetector;
use crate::style::StyleManager;
use crate::surface::{
    BookDocument, Insets, LoadedSection, PageInfo, RangeHandle, RelocateDetail, RelocateReason,
    RenderingSurface, Size, SurfaceEvent, SurfaceFactory, TextDirection, TimeInfo,
};
use crate::transform::ContentPipeline;

const RTL_LANGUAGES: [&str; 10] = ["ar", "he", "fa", "ur", "yi", "ps", "sd", "ug", "ku", "dv"];

/// Normalized reading position, produced on every relocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressRecord {
    pub location: String,
    pub section_href: String,
    pub section_label: String,
    pub section_id: usize,
    pub section_index: usize,
    pub page_info: Option<PageInfo>,
    pub time_info: Option<TimeInfo>,
    pub range: Option<RangeHandle>,
    pub fraction: f64,
}

impl ProgressRecord {
    /// Page numbers are clamped so that `current < total` once the total is
    /// known.
    pub fn from_relocate(detail: &RelocateDetail) -> Self {
        let page_info = detail.location.map(|mut page| {
            if page.total > 0 && page.current >= page.total {
                page.current = page.total - 1;
            }
            page
        });
        let toc = detail.toc_item.as_ref();
        Self {
            location: detail.cfi.clone(),
            section_href: toc.map(|t| t.href.clone()).unwrap_or_default(),
            section_label: toc.map(|t| t.label.clone()).unwrap_or_default(),
            section_id: toc.map(|t| t.id).unwrap_or(0),
            section_index: detail.section.current,
            page_info,
            time_info: detail.time,
            range: detail.range.clone(),
            fraction: detail.fraction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerPhase {
    Uninitialized,
    Initializing,
    Ready,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewerHandler {
    Load,
    Relocate,
    RendererRelocate,
    Resize,
    Message,
}

pub type ProgressCallback = Box<dyn FnMut(&ProgressRecord, &str)>;
pub type ViewSettingsCallback = Box<dyn FnMut(&ViewSettings)>;
pub type LayoutStableCallback = Box<dyn FnMut(&[String])>;

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub book_id: String,
    pub book: BookDocument,
    /// Saved location to restore, if any.
    pub last_location: Option<String>,
    pub insets: Insets,
    /// Bounding size of the pane container.
    pub container: Size,
    pub view_settings: ViewSettings,
}

/// Direction implied by a language tag, when it implies one.
pub fn language_direction(language: Option<&str>) -> Option<TextDirection> {
    let primary = language?.split(['-', '_']).next()?.to_ascii_lowercase();
    RTL_LANGUAGES
        .contains(&primary.as_str())
        .then_some(TextDirection::Rtl)
}

pub struct Viewer {
    config: ViewerConfig,
    phase: ViewerPhase,
    surface: Option<Box<dyn RenderingSurface>>,
    router: EventRouter<ViewerHandler>,
    style: Option<StyleManager>,
    stability: LayoutStabilityDetector,
    pipeline: Option<ContentPipeline>,
    bound_documents: HashSet<u64>,
    progress: Option<ProgressRecord>,
    on_progress: Option<ProgressCallback>,
    on_view_settings: Option<ViewSettingsCallback>,
    on_layout_stable: Option<LayoutStableCallback>,
}

impl fmt::Debug for Viewer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Viewer")
            .field("book_id", &self.config.book_id)
            .field("phase", &self.phase)
            .field("has_surface", &self.surface.is_some())
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl Viewer {
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            phase: ViewerPhase::Uninitialized,
            surface: None,
            router: EventRouter::new(),
            style: None,
            stability: LayoutStabilityDetector::new(),
            pipeline: None,
            bound_documents: HashSet::new(),
            progress: None,
            on_progress: None,
            on_view_settings: None,
            on_layout_stable: None,
        }
    }

    pub fn book_id(&self) -> &str {
        &self.config.book_id
    }

    pub fn book(&self) -> &BookDocument {
        &self.config.book
    }

    pub fn phase(&self) -> ViewerPhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == ViewerPhase::Ready
    }

    /// Last relocation, if any happened yet.
    pub fn progress(&self) -> Option<&ProgressRecord> {
        self.progress.as_ref()
    }

    /// Live view settings once styles exist, the configured ones before.
    pub fn view_settings(&self) -> &ViewSettings {
        self.style
            .as_ref()
            .map(StyleManager::current_settings)
            .unwrap_or(&self.config.view_settings)
    }

    pub fn style_manager(&self) -> Option<&StyleManager> {
        self.style.as_ref()
    }

    pub fn pipeline(&self) -> Option<&ContentPipeline> {
        self.pipeline.as_ref()
    }

    pub fn get_view(&self) -> Option<&dyn RenderingSurface> {
        self.surface.as_deref()
    }

    pub fn get_view_mut(&mut self) -> Option<&mut (dyn RenderingSurface + 'static)> {
        self.surface.as_deref_mut()
    }

    /// The surface together with the live settings, for collaborators that
    /// need both at once.
    pub fn surface_and_settings(&mut self) -> Option<(&mut dyn RenderingSurface, &ViewSettings)> {
        let settings = self
            .style
            .as_ref()
            .map(StyleManager::current_settings)
            .unwrap_or(&self.config.view_settings);
        let surface = self.surface.as_deref_mut()?;
        Some((surface, settings))
    }

    /// Container minus insets.
    pub fn dimensions(&self) -> Size {
        let Insets {
            top,
            right,
            bottom,
            left,
        } = self.config.insets;
        Size::new(
            self.config.container.width - left - right,
            self.config.container.height - top - bottom,
        )
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

    /// Builds the surface and shows the document. On failure everything
    /// built so far is torn down and the viewer ends up destroyed.
    pub fn initialize(&mut self, factory: &mut dyn SurfaceFactory) -> Result<(), ViewerError> {
        if self.phase != ViewerPhase::Uninitialized {
            return Err(ViewerError::AlreadyInitialized);
        }
        self.phase = ViewerPhase::Initializing;

        match self.try_initialize(factory) {
            Ok(()) => {
                info!("Viewer ready for {}", self.config.book_id);
                self.phase = ViewerPhase::Ready;
                Ok(())
            }
            Err(e) => {
                error!("Viewer initialization failed for {}: {e}", self.config.book_id);
                self.destroy();
                Err(e)
            }
        }
    }

    fn try_initialize(&mut self, factory: &mut dyn SurfaceFactory) -> Result<(), ViewerError> {
        let surface = factory
            .create(&self.config.book_id)
            .map_err(ViewerError::SurfaceCreation)?;
        self.surface = Some(surface);

        self.router.setup_surface_handlers(SurfaceHandlers {
            load: ViewerHandler::Load,
            relocate: ViewerHandler::Relocate,
            renderer_relocate: ViewerHandler::RendererRelocate,
            draw_annotation: None,
            show_annotation: None,
        });
        self.router.setup_global_listeners(
            &self.config.book_id,
            GlobalHandlers {
                resize: ViewerHandler::Resize,
                message: ViewerHandler::Message,
            },
        );

        self.open_book()?;
        self.install_pipeline();
        self.initialize_styles();
        self.navigate_to_initial_position()
    }

    fn open_book(&mut self) -> Result<(), ViewerError> {
        let settings = &self.config.view_settings;
        let book = &mut self.config.book;
        if let Some((_, rtl)) = settings.writing_mode.direction() {
            book.dir = Some(if rtl {
                TextDirection::Rtl
            } else {
                TextDirection::Ltr
            });
        } else if let Some(dir) = language_direction(book.language.as_deref()) {
            book.dir = Some(dir);
        }

        let Some(surface) = self.surface.as_deref_mut() else {
            return Err(ViewerError::NotReady);
        };
        surface.open(book).map_err(ViewerError::Open)
    }

    /// Installs a transform pipeline built from the current dimensions and
    /// settings, replacing the previous one.
    fn install_pipeline(&mut self) {
        let settings = self.view_settings();
        let pipeline = ContentPipeline::new(
            self.config.book_id.clone(),
            self.dimensions(),
            settings.vertical,
            settings.allow_script,
        );
        if self.pipeline.as_ref() == Some(&pipeline) {
            return;
        }
        if let Some(surface) = self.surface.as_deref_mut() {
            surface.set_content_transform(pipeline.clone());
        }
        self.pipeline = Some(pipeline);
    }

    fn initialize_styles(&mut self) {
        let mut style = StyleManager::new(self.config.view_settings.clone());
        let dimensions = self.dimensions();
        if let Some(surface) = self.surface.as_deref_mut() {
            style.update_layout(surface.renderer_mut(), dimensions);
            style.flush_styles(surface.renderer_mut());
        }
        self.style = Some(style);
    }

    fn navigate_to_initial_position(&mut self) -> Result<(), ViewerError> {
        let Some(surface) = self.surface.as_deref_mut() else {
            return Err(ViewerError::NotReady);
        };
        match self.config.last_location.as_deref() {
            Some(location) => surface.init(Some(location)),
            None => surface.go_to_fraction(0.0),
        }
        .map_err(ViewerError::InitialNavigation)
    }

    /// Runs the handlers registered for `event`.
    pub fn handle_event(&mut self, event: &ReaderEvent, now: Instant) {
        if self.phase != ViewerPhase::Ready {
            return;
        }
        let (target, name) = event.route();
        let handlers = match event {
            ReaderEvent::ResizeUpdate { book_ids } => {
                self.router.scoped_handlers(target, name, book_ids)
            }
            _ => self.router.handlers(target, name),
        };

        for handler in handlers {
            match (handler, event) {
                (ViewerHandler::Load, ReaderEvent::Surface(SurfaceEvent::Load(section))) => {
                    self.handle_load(section, now)
                }
                (ViewerHandler::Relocate, ReaderEvent::Surface(SurfaceEvent::Relocate(detail))) => {
                    self.handle_relocate(detail);
                }
                (
                    ViewerHandler::RendererRelocate,
                    ReaderEvent::Surface(SurfaceEvent::RendererRelocate { reason }),
                ) => {
                    self.handle_renderer_relocate(*reason);
                }
                (ViewerHandler::Resize, ReaderEvent::ResizeUpdate { .. }) => self.handle_resize(now),
                (ViewerHandler::Message, ReaderEvent::Message(message)) => {
                    self.handle_message(message)
                }
                _ => {}
            }
        }
    }

    /// A sub-document finished loading.
    pub fn handle_load(&mut self, section: &LoadedSection, now: Instant) {
        let current = self.view_settings().clone();
        let (vertical, rtl) = current
            .writing_mode
            .direction()
            .or_else(|| section.direction.map(|d| (d.vertical, d.rtl)))
            .unwrap_or((current.vertical, current.rtl));

        if (vertical, rtl) != (current.vertical, current.rtl) {
            debug!(
                "Section {} of {} is vertical={vertical} rtl={rtl}",
                section.index, self.config.book_id
            );
            self.update_view_settings(&ViewSettingsPatch::direction(vertical, rtl), now);
        }
        let updated = self.view_settings().clone();
        if let Some(callback) = self.on_view_settings.as_mut() {
            callback(&updated);
        }

        let cjk = self.config.book.is_cjk();
        let fixed_layout = self.config.book.is_fixed_layout();
        let Some(surface) = self.surface.as_deref_mut() else {
            return;
        };
        if let Err(e) = surface.mount_fonts(section.index, cjk) {
            error!("Failed to mount fonts: {e:#}");
        }
        if fixed_layout {
            surface.apply_fixed_layout_styles(section.index);
        }
        if self.bound_documents.insert(section.doc_id) {
            surface.bind_frame_listeners(section.doc_id, section.index);
        }
    }

    /// Normalizes a relocation and hands it to the progress callback.
    pub fn handle_relocate(&mut self, detail: &RelocateDetail) -> &ProgressRecord {
        let record = &*self.progress.insert(ProgressRecord::from_relocate(detail));
        if let Some(callback) = self.on_progress.as_mut() {
            callback(record, &self.config.book_id);
        }
        record
    }

    /// True for the reasons that move the reading position.
    pub fn handle_renderer_relocate(&self, reason: RelocateReason) -> bool {
        matches!(reason, RelocateReason::Scroll | RelocateReason::Page)
    }

    pub fn handle_resize(&mut self, now: Instant) {
        if self.phase != ViewerPhase::Ready {
            return;
        }
        self.relayout();
        self.check_layout_stability(now);
    }

    /// A single click inside this pane clears search highlighting.
    pub fn handle_message(&mut self, message: &FrameMessage) {
        if message.book_id != self.config.book_id {
            return;
        }
        if let FrameMessageKind::SingleClick { .. } = message.kind {
            if let Some(surface) = self.surface.as_deref_mut() {
                surface.clear_search();
            }
        }
    }

    fn relayout(&mut self) {
        let dimensions = self.dimensions();
        if let (Some(style), Some(surface)) = (self.style.as_mut(), self.surface.as_deref_mut()) {
            style.update_layout(surface.renderer_mut(), dimensions);
        }
    }

    fn check_layout_stability(&mut self, now: Instant) {
        let probe = self
            .surface
            .as_deref()
            .and_then(|surface| surface.renderer().layout_probe());
        if probe.is_none() {
            self.stability.cancel();
            self.emit_layout_stable();
            return;
        }
        self.stability.start(now);
    }

    fn emit_layout_stable(&mut self) {
        let book_ids = [self.config.book_id.clone()];
        debug!("Layout stable for {}", self.config.book_id);
        if let Some(callback) = self.on_layout_stable.as_mut() {
            callback(&book_ids);
        }
    }

    pub fn update_view_settings(&mut self, patch: &ViewSettingsPatch, now: Instant) {
        let Some(style) = self.style.as_mut() else {
            warn!("View settings update before styles exist for {}", self.config.book_id);
            return;
        };
        if style.update_settings(patch, now) {
            self.relayout();
            self.install_pipeline();
        }
    }

    pub fn update_theme(&mut self, palette: ThemePalette, now: Instant) {
        if let Some(style) = self.style.as_mut() {
            style.update_theme(palette, now);
        }
    }

    pub fn update_insets(&mut self, insets: Insets) {
        self.config.insets = insets;
        self.relayout();
        self.install_pipeline();
    }

    pub fn update_container(&mut self, container: Size) {
        self.config.container = container;
        self.relayout();
        self.install_pipeline();
    }

    pub fn refresh(&mut self, now: Instant) {
        if self.phase != ViewerPhase::Ready {
            return;
        }
        self.relayout();
        if let Some(style) = self.style.as_mut() {
            style.apply_styles(now);
        }
        self.check_layout_stability(now);
    }

    /// Fires due timers. Returns true if anything fired.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut fired = false;
        if let (Some(style), Some(surface)) = (self.style.as_mut(), self.surface.as_deref_mut()) {
            fired |= style.tick(surface.renderer_mut(), now);
        }
        let surface = self.surface.as_deref();
        if self
            .stability
            .tick(now, || surface.and_then(|s| s.renderer().layout_probe()))
        {
            self.emit_layout_stable();
            fired = true;
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let style = self.style.as_ref().and_then(StyleManager::next_deadline);
        [style, self.stability.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Releases everything. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.phase == ViewerPhase::Destroyed {
            return;
        }
        if let Some(mut style) = self.style.take() {
            style.dispose();
        }
        self.stability.cancel();
        self.router.destroy();
        if let Some(mut surface) = self.surface.take() {
            surface.close();
        }
        self.pipeline = None;
        self.bound_documents.clear();
        self.phase = ViewerPhase::Destroyed;
        debug!("Viewer destroyed for {}", self.config.book_id);
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.destroy();
    }
}
