//! Placement of the floating selection popups inside a reader pane.
//!
//! All coordinates are relative to the pane's top-left corner. Sizes are
//! given as laid out on screen: callers swap width and height for vertical
//! writing modes through [`laid_out`].

use serde::Serialize;

use crate::surface::{Point, Rect, Size};

pub const POPUP_PADDING: f64 = 10.0;
pub const ANNOTATION_POPUP_WIDTH: f64 = 220.0;
pub const ANNOTATION_POPUP_WIDTH_VERTICAL: f64 = 240.0;
pub const ANNOTATION_POPUP_HEIGHT: f64 = 36.0;
pub const ASK_AI_POPUP_WIDTH: f64 = 320.0;
pub const ASK_AI_POPUP_HEIGHT: f64 = 120.0;
pub const OPTIONS_PADDING: f64 = 16.0;
pub const OPTIONS_SPACING: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub point: Point,
    pub dir: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PopupGeometry {
    pub triangle: Position,
    pub popup: Position,
    /// Highlight options panel, when visible.
    pub options_panel: Option<Rect>,
}

/// Logical size of the annotation popup before any swap.
pub fn annotation_popup_size(vertical: bool, viewport_width: f64) -> Size {
    let base = if vertical {
        ANNOTATION_POPUP_WIDTH_VERTICAL
    } else {
        ANNOTATION_POPUP_WIDTH
    };
    Size::new(
        base.min(viewport_width - 2.0 * POPUP_PADDING),
        ANNOTATION_POPUP_HEIGHT,
    )
}

pub fn ask_ai_popup_size() -> Size {
    Size::new(ASK_AI_POPUP_WIDTH, ASK_AI_POPUP_HEIGHT)
}

/// On-screen size of a popup: vertical writing modes lay it out sideways.
pub fn laid_out(size: Size, vertical: bool) -> Size {
    if vertical { size.swapped() } else { size }
}

fn bounding(rects: &[Rect]) -> Option<Rect> {
    let mut iter = rects.iter().filter(|r| !r.is_empty());
    let first = *iter.next()?;
    Some(iter.fold(first, |acc, r| Rect {
        left: acc.left.min(r.left),
        top: acc.top.min(r.top),
        right: acc.right.max(r.right),
        bottom: acc.bottom.max(r.bottom),
    }))
}

fn clamp(value: f64, low: f64, high: f64) -> f64 {
    value.min(high).max(low)
}

/// Anchor point of the popup triangle for a selection. Points at the side
/// of the selection with more room. `None` for degenerate input.
pub fn triangle_position(rects: &[Rect], pane: Size, padding: f64, vertical: bool) -> Option<Position> {
    if pane.width <= 2.0 * padding || pane.height <= 2.0 * padding {
        return None;
    }
    let bounds = bounding(rects)?;

    let position = if vertical {
        let dir = if bounds.left >= pane.width - bounds.right {
            Direction::Left
        } else {
            Direction::Right
        };
        let x = match dir {
            Direction::Left => bounds.left - padding,
            _ => bounds.right + padding,
        };
        Position {
            point: Point::new(
                clamp(x, padding, pane.width - padding),
                clamp((bounds.top + bounds.bottom) / 2.0, padding, pane.height - padding),
            ),
            dir,
        }
    } else {
        let dir = if bounds.top >= pane.height - bounds.bottom {
            Direction::Up
        } else {
            Direction::Down
        };
        let y = match dir {
            Direction::Up => bounds.top - padding,
            _ => bounds.bottom + padding,
        };
        Position {
            point: Point::new(
                clamp((bounds.left + bounds.right) / 2.0, padding, pane.width - padding),
                clamp(y, padding, pane.height - padding),
            ),
            dir,
        }
    };

    if position.point.x <= 0.0 || position.point.y <= 0.0 {
        return None;
    }
    Some(position)
}

/// Places a popup of on-screen `size` next to the triangle, preferring the
/// triangle's side and falling back to the side with more room. The result
/// always lies within the pane, `padding` away from its edges.
pub fn popup_position(triangle: Position, pane: Size, size: Size, padding: f64) -> Position {
    let p = triangle.point;
    let place = |dir: Direction| match dir {
        Direction::Up => Point::new(p.x - size.width / 2.0, p.y - size.height),
        Direction::Down => Point::new(p.x - size.width / 2.0, p.y),
        Direction::Left => Point::new(p.x - size.width, p.y - size.height / 2.0),
        Direction::Right => Point::new(p.x, p.y - size.height / 2.0),
    };
    let room = |dir: Direction| match dir {
        Direction::Up => p.y - padding,
        Direction::Down => pane.height - padding - p.y,
        Direction::Left => p.x - padding,
        Direction::Right => pane.width - padding - p.x,
    };
    let needed = |dir: Direction| match dir {
        Direction::Up | Direction::Down => size.height,
        Direction::Left | Direction::Right => size.width,
    };

    let preferred = triangle.dir;
    let other = preferred.opposite();
    let dir = if room(preferred) >= needed(preferred) {
        preferred
    } else if room(other) >= needed(other) || room(other) > room(preferred) {
        other
    } else {
        preferred
    };

    let point = place(dir);
    Position {
        point: Point::new(
            clamp(point.x, padding, pane.width - size.width - padding),
            clamp(point.y, padding, pane.height - size.height - padding),
        ),
        dir,
    }
}

/// Rectangle of the highlight options panel next to the annotation popup.
/// `popup_size` is the logical (unswapped) popup size.
pub fn options_panel_position(
    popup: Position,
    triangle_dir: Direction,
    popup_size: Size,
    vertical: bool,
    viewport: Size,
) -> Rect {
    let panel = laid_out(popup_size, vertical);
    let origin = popup.point;

    if vertical {
        let space_left = origin.x;
        let space_right = viewport.width - origin.x;
        let needs = panel.width + OPTIONS_PADDING;
        let to_left = origin.x - needs;
        let to_right = origin.x + popup_size.height + OPTIONS_PADDING;

        let left = match triangle_dir {
            Direction::Left if space_left >= needs => to_left,
            Direction::Right if space_right >= needs => to_right,
            _ if space_left > space_right => to_left,
            _ => to_right,
        };
        let left = clamp(
            left,
            OPTIONS_PADDING,
            viewport.width - panel.width - OPTIONS_PADDING,
        );
        let mut top = origin.y;
        if top + panel.height > viewport.height - OPTIONS_PADDING {
            top = viewport.height - panel.height - OPTIONS_PADDING;
        }
        return Rect::new(left, top.max(OPTIONS_PADDING), panel.width, panel.height);
    }

    let popup_bottom = origin.y + popup_size.height;
    let space_above = origin.y;
    let space_below = viewport.height - popup_bottom;
    let needs = panel.height + OPTIONS_SPACING;
    let above = origin.y - needs;
    let below = popup_bottom + OPTIONS_SPACING;

    let top = match triangle_dir {
        Direction::Up if space_above >= needs => above,
        Direction::Down if space_below >= needs => below,
        _ if space_below >= needs => below,
        _ if space_above >= needs => above,
        _ => below,
    };
    let left = match triangle_dir {
        Direction::Right => origin.x + popup_size.width - panel.width,
        _ => origin.x,
    };
    let left = clamp(
        left,
        OPTIONS_PADDING,
        viewport.width - panel.width - OPTIONS_PADDING,
    );
    Rect::new(left, top.max(OPTIONS_PADDING), panel.width, panel.height)
}

/// Full geometry of the annotation popup for a selection.
pub fn annotation_popup_geometry(
    rects: &[Rect],
    pane: Size,
    vertical: bool,
    with_options: bool,
) -> Option<PopupGeometry> {
    let triangle = triangle_position(rects, pane, POPUP_PADDING, vertical)?;
    let size = annotation_popup_size(vertical, pane.width);
    if size.width <= 0.0 {
        return None;
    }
    let popup = popup_position(triangle, pane, laid_out(size, vertical), POPUP_PADDING);
    let options_panel =
        with_options.then(|| options_panel_position(popup, triangle.dir, size, vertical, pane));
    Some(PopupGeometry {
        triangle,
        popup,
        options_panel,
    })
}

pub fn ask_ai_popup_geometry(rects: &[Rect], pane: Size, vertical: bool) -> Option<PopupGeometry> {
    let triangle = triangle_position(rects, pane, POPUP_PADDING, vertical)?;
    let size = laid_out(ask_ai_popup_size(), vertical);
    let popup = popup_position(triangle, pane, size, POPUP_PADDING);
    Some(PopupGeometry {
        triangle,
        popup,
        options_panel: None,
    })
}
