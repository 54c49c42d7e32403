//! Contracts for the isolated rendering surface that lays out documents.
//!
//! The engine never implements a surface itself; hosts plug one in through
//! [`SurfaceFactory`] and feed its notifications back as [`SurfaceEvent`]s.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::annotation::Annotation;
use crate::overlay::DrawPrimitive;
use crate::transform::ContentPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn swapped(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            right: left + width,
            bottom: top + height,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self {
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Insets {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

/// Opaque handle to a live text range inside the surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageInfo {
    pub current: usize,
    pub next: Option<usize>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeInfo {
    /// Minutes left in the current section.
    pub section: f64,
    /// Minutes left in the book.
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TocItem {
    pub id: usize,
    pub href: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionInfo {
    pub current: usize,
    pub total: usize,
}

/// Raw relocation notification as the surface reports it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelocateDetail {
    pub cfi: String,
    pub toc_item: Option<TocItem>,
    pub section: SectionInfo,
    pub location: Option<PageInfo>,
    pub time: Option<TimeInfo>,
    pub range: Option<RangeHandle>,
    pub fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocateReason {
    Page,
    Scroll,
    Snap,
    Navigation,
    Selection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextDirection {
    #[default]
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenditionLayout {
    #[default]
    Reflowable,
    PrePaginated,
}

/// The parsed document handed to the surface. Parsing is the host's job.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BookDocument {
    pub title: String,
    pub language: Option<String>,
    pub dir: Option<TextDirection>,
    pub rendition_layout: RenditionLayout,
    pub section_count: usize,
}

impl BookDocument {
    pub fn is_cjk(&self) -> bool {
        self.language
            .as_deref()
            .map(|lang| {
                let lang = lang.to_ascii_lowercase();
                lang.starts_with("zh") || lang.starts_with("ja") || lang.starts_with("ko")
            })
            .unwrap_or(false)
    }

    pub fn is_fixed_layout(&self) -> bool {
        self.rendition_layout == RenditionLayout::PrePaginated
    }
}

/// Direction a loaded sub-document declares through its own styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeclaredDirection {
    pub vertical: bool,
    pub rtl: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadedSection {
    pub doc_id: u64,
    pub index: usize,
    pub direction: Option<DeclaredDirection>,
}

/// A sub-document currently mounted by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionContents {
    pub doc_id: u64,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RendererMetrics {
    pub scrolled: bool,
    pub start: f64,
    pub end: f64,
    pub size: f64,
    pub view_size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayoutSnapshot {
    pub scroll_width: f64,
    pub scroll_height: f64,
    pub child_count: usize,
}

/// Layout engine of the surface: paginator or scroller.
pub trait Renderer {
    fn set_attribute(&mut self, name: &str, value: &str);
    fn remove_attribute(&mut self, name: &str);
    fn set_styles(&mut self, css: &str) -> Result<()>;
    fn metrics(&self) -> RendererMetrics;
    /// Geometry used by the layout stability detector. `None` when the
    /// renderer cannot be measured.
    fn layout_probe(&self) -> Option<LayoutSnapshot>;
}

pub trait RenderingSurface {
    fn open(&mut self, book: &BookDocument) -> Result<()>;
    fn init(&mut self, last_location: Option<&str>) -> Result<()>;
    fn go_to(&mut self, target: &str) -> Result<()>;
    fn go_to_fraction(&mut self, fraction: f64) -> Result<()>;
    fn prev(&mut self, distance: Option<f64>);
    fn next(&mut self, distance: Option<f64>);
    fn go_left(&mut self);
    fn go_right(&mut self);
    fn get_cfi(&self, index: usize, range: &RangeHandle) -> Option<String>;
    fn deselect(&mut self);
    fn history_back(&mut self);
    fn history_forward(&mut self);
    fn reload(&mut self);
    fn clear_search(&mut self);

    fn renderer_mut(&mut self) -> &mut dyn Renderer;
    fn renderer(&self) -> &dyn Renderer;
    fn contents(&self) -> Vec<SectionContents>;

    /// Attaches an annotation; the surface answers with a draw request for
    /// every mounted section containing it.
    fn add_annotation(&mut self, annotation: &Annotation);
    fn remove_annotation(&mut self, cfi: &str);
    fn draw_overlay(&mut self, key: &str, index: usize, primitive: DrawPrimitive);

    fn set_content_transform(&mut self, pipeline: ContentPipeline);
    fn bind_frame_listeners(&mut self, doc_id: u64, index: usize);
    fn mount_fonts(&mut self, index: usize, cjk: bool) -> Result<()>;
    fn apply_fixed_layout_styles(&mut self, index: usize);
    fn book_dir(&self) -> Option<TextDirection>;
    fn close(&mut self);
}

pub trait SurfaceFactory {
    fn create(&mut self, book_id: &str) -> Result<Box<dyn RenderingSurface>>;
}

/// Request from the surface to paint one annotation in one section.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRequest {
    pub cfi: String,
    pub index: usize,
    pub rects: Vec<Rect>,
    pub line_height: Option<f64>,
    pub font_size: Option<f64>,
    pub vertical: bool,
}

/// The user activated an existing annotation inside the surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ShowAnnotation {
    pub cfi: String,
    pub index: usize,
    pub range: RangeHandle,
    pub rects: Vec<Rect>,
    pub text: String,
}

/// A text fragment of the native selection and the tag of its parent element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionFragment {
    pub text: String,
    pub parent_tag: String,
}

impl SelectionFragment {
    pub fn new(text: impl Into<String>, parent_tag: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parent_tag: parent_tag.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeSelection {
    pub fragments: Vec<SelectionFragment>,
    pub range: RangeHandle,
    /// Client rects relative to the host pane.
    pub rects: Vec<Rect>,
    /// Text of the nearest paragraph, list item, heading or table cell.
    pub block_text: String,
    /// Offset of the selection's first character within `block_text`.
    pub block_offset: usize,
}

impl NativeSelection {
    pub fn is_empty(&self) -> bool {
        self.fragments.iter().all(|f| f.text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointerUp {
    pub doc_id: u64,
    pub index: usize,
    pub selection: Option<NativeSelection>,
}

/// Notifications raised by the rendering surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Load(LoadedSection),
    Relocate(RelocateDetail),
    RendererRelocate { reason: RelocateReason },
    DrawAnnotation(DrawRequest),
    ShowAnnotation(ShowAnnotation),
    PointerUp(PointerUp),
    Scroll,
}

impl SurfaceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SurfaceEvent::Load(_) => "load",
            SurfaceEvent::Relocate(_) => "relocate",
            SurfaceEvent::RendererRelocate { .. } => "renderer-relocate",
            SurfaceEvent::DrawAnnotation(_) => "draw-annotation",
            SurfaceEvent::ShowAnnotation(_) => "show-annotation",
            SurfaceEvent::PointerUp(_) => "pointerup",
            SurfaceEvent::Scroll => "scroll",
        }
    }
}
