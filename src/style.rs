use std::time::{Duration, Instant};

use log::{debug, error};

use crate::settings::{ColumnMode, ThemePalette, ViewSettings, ViewSettingsPatch};
use crate::surface::{Renderer, Size};
use crate::timer::Deadline;

pub const STYLE_DEBOUNCE: Duration = Duration::from_millis(50);

const MIN_SINGLE_COLUMN_INLINE: f64 = 720.0;
const MIN_TWO_COLUMN_INLINE: f64 = 320.0;
const MIN_BLOCK_SIZE: f64 = 1440.0;
const FALLBACK_GAP_PERCENT: f64 = 4.0;
const GAP_FRACTION: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComputedLayout {
    pub max_column_count: u32,
    pub max_inline_size: f64,
    pub max_block_size: f64,
    pub gap_px: f64,
}

fn gap_percent(settings: &ViewSettings) -> f64 {
    if settings.gap_percent > 0.0 {
        settings.gap_percent
    } else {
        FALLBACK_GAP_PERCENT
    }
}

/// Column geometry for a container. The gap is derived from its percentage
/// as if it were cut out of the container before columns are sized.
pub fn calculate_layout(settings: &ViewSettings, dimensions: Size) -> ComputedLayout {
    let (container, block) = if settings.vertical {
        (dimensions.height, dimensions.width)
    } else {
        (dimensions.width, dimensions.height)
    };

    let g = GAP_FRACTION;
    let gap_px = (-g / (g - 1.0)) * container * (gap_percent(settings) / 100.0);

    let mut max_inline_size = if settings.max_inline_size > 0.0 {
        settings.max_inline_size
    } else {
        MIN_SINGLE_COLUMN_INLINE
    };
    let mut max_column_count = if settings.max_column_count > 0 {
        settings.max_column_count
    } else {
        2
    };
    let max_block_size = settings
        .max_block_size
        .filter(|size| *size > 0.0)
        .unwrap_or_else(|| block.max(MIN_BLOCK_SIZE));

    if settings.scrolled || settings.column_mode == ColumnMode::One {
        max_column_count = 1;
        max_inline_size = container.max(MIN_SINGLE_COLUMN_INLINE);
    } else if settings.column_mode == ColumnMode::Two {
        max_column_count = 2;
        max_inline_size = MIN_TWO_COLUMN_INLINE.max((container / 2.0 - gap_px).floor());
    }

    ComputedLayout {
        max_column_count,
        max_inline_size,
        max_block_size,
        gap_px,
    }
}

/// CSS handed to the renderer for the given settings.
pub fn build_stylesheet(
    settings: &ViewSettings,
    dimensions: Option<Size>,
    palette: &ThemePalette,
) -> String {
    let zoom = if settings.zoom_level > 0.0 {
        settings.zoom_level / 100.0
    } else {
        1.0
    };
    let font_size = settings.default_font_size * zoom;
    let min_font_size = settings.minimum_font_size * zoom;
    let align = if settings.full_justification {
        "justify"
    } else {
        "start"
    };
    let hyphens = if settings.hyphenation { "auto" } else { "manual" };
    let writing_mode = if settings.vertical {
        if settings.rtl {
            "vertical-rl"
        } else {
            "vertical-lr"
        }
    } else {
        "horizontal-tb"
    };

    let mut css = format!(
        r#"html {{
  --theme-bg-color: {bg};
  --theme-fg-color: {fg};
  --theme-primary-color: {primary};
  color-scheme: {scheme};
  writing-mode: {writing_mode};
}}
html, body {{
  color: {fg};
  font-size: {font_size}px !important;
  line-height: {line_height} !important;
  -webkit-text-size-adjust: none;
  text-size-adjust: none;
}}
p, li, blockquote, dd {{
  margin-block: {margin}em !important;
  text-align: {align};
  hyphens: {hyphens};
}}
font[size="1"] {{ font-size: {min_font_size}px; }}
a:any-link {{ text-decoration: none; }}
"#,
        bg = palette.bg,
        fg = palette.fg,
        primary = palette.primary,
        scheme = if palette.is_dark { "dark" } else { "light" },
        line_height = settings.line_height,
        margin = settings.paragraph_margin,
    );

    if let Some(size) = dimensions {
        css.push_str(&format!(
            "img, svg, video {{\n  max-width: {}px;\n  max-height: {}px;\n  object-fit: contain;\n}}\n",
            size.width, size.height
        ));
    }
    if palette.is_dark {
        css.push_str("p img, span img, sup img { mix-blend-mode: screen; }\n");
    }
    css
}

/// Owns the view-settings snapshot and keeps the renderer's layout
/// attributes and stylesheet in sync with it.
#[derive(Debug)]
pub struct StyleManager {
    settings: ViewSettings,
    palette: ThemePalette,
    dimensions: Option<Size>,
    current_styles: Option<String>,
    pending: Deadline,
    applications: usize,
    disposed: bool,
}

impl StyleManager {
    pub fn new(settings: ViewSettings) -> Self {
        let palette = ThemePalette::named(&settings.theme);
        Self {
            settings,
            palette,
            dimensions: None,
            current_styles: None,
            pending: Deadline::new(),
            applications: 0,
            disposed: false,
        }
    }

    pub fn current_settings(&self) -> &ViewSettings {
        &self.settings
    }

    pub fn current_styles(&self) -> Option<&str> {
        self.current_styles.as_deref()
    }

    pub fn dimensions(&self) -> Option<Size> {
        self.dimensions
    }

    /// Number of stylesheet applications so far.
    pub fn applications(&self) -> usize {
        self.applications
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_armed()
    }

    /// Merges the patch; schedules a style application when anything changed.
    pub fn update_settings(&mut self, patch: &ViewSettingsPatch, now: Instant) -> bool {
        let changed = patch.apply_to(&mut self.settings);
        if changed {
            if patch.theme.is_some() {
                self.palette = ThemePalette::named(&self.settings.theme);
            }
            self.apply_styles(now);
        }
        changed
    }

    pub fn update_theme(&mut self, palette: ThemePalette, now: Instant) {
        self.settings.theme = palette.name.clone();
        self.palette = palette;
        self.apply_styles(now);
    }

    pub fn update_layout(&mut self, renderer: &mut dyn Renderer, dimensions: Size) {
        if self.disposed {
            return;
        }
        self.dimensions = Some(dimensions);
        let layout = calculate_layout(&self.settings, dimensions);
        debug!(
            "Layout for {}x{}: {} columns, inline {}px",
            dimensions.width, dimensions.height, layout.max_column_count, layout.max_inline_size
        );

        renderer.set_attribute("max-column-count", &layout.max_column_count.to_string());
        renderer.set_attribute("max-inline-size", &format!("{}px", layout.max_inline_size));
        renderer.set_attribute("max-block-size", &format!("{}px", layout.max_block_size));
        renderer.set_attribute("gap", &format!("{}%", gap_percent(&self.settings)));

        if self.settings.scrolled {
            renderer.set_attribute("flow", "scrolled");
        } else {
            renderer.remove_attribute("flow");
        }
        if self.settings.animated {
            renderer.set_attribute("animated", "");
        } else {
            renderer.remove_attribute("animated");
        }
    }

    /// Schedules a style application, replacing any pending one.
    pub fn apply_styles(&mut self, now: Instant) {
        if self.disposed {
            return;
        }
        self.pending.arm(now, STYLE_DEBOUNCE);
    }

    /// Applies immediately, dropping any pending application.
    pub fn flush_styles(&mut self, renderer: &mut dyn Renderer) {
        self.pending.cancel();
        self.do_apply_styles(renderer);
    }

    /// Runs the pending application once its window has passed.
    pub fn tick(&mut self, renderer: &mut dyn Renderer, now: Instant) -> bool {
        if self.pending.fire(now) {
            self.do_apply_styles(renderer);
            return true;
        }
        false
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.due_at()
    }

    fn do_apply_styles(&mut self, renderer: &mut dyn Renderer) {
        if self.disposed {
            return;
        }
        let css = build_stylesheet(&self.settings, self.dimensions, &self.palette);
        match renderer.set_styles(&css) {
            Ok(()) => {
                self.applications += 1;
                self.current_styles = Some(css);
            }
            Err(e) => error!("Error applying styles: {e:#}"),
        }
    }

    pub fn dispose(&mut self) {
        self.pending.cancel();
        self.disposed = true;
    }
}
