//! Vector primitives the surface paints over annotated text.

use crate::annotation::{HighlightColor, HighlightStyle};
use crate::settings::ViewSettings;
use crate::surface::{DrawRequest, Rect};

pub const STROKE_WIDTH: f64 = 2.0;
pub const HIGHLIGHT_OPACITY: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub enum DrawPrimitive {
    /// Filled, translucent rectangles over the text.
    Highlight {
        rects: Vec<Rect>,
        color: String,
        opacity: f64,
    },
    /// Solid bars under (or beside, for vertical text) each line box.
    Underline { rects: Vec<Rect>, color: String },
    /// One zigzag path per line box, in SVG path syntax.
    Squiggly {
        paths: Vec<String>,
        color: String,
        width: f64,
    },
}

impl DrawPrimitive {
    pub fn color(&self) -> &str {
        match self {
            DrawPrimitive::Highlight { color, .. }
            | DrawPrimitive::Underline { color, .. }
            | DrawPrimitive::Squiggly { color, .. } => color,
        }
    }
}

/// Distance between the glyphs and an underline or squiggle.
///
/// Vertical text centres the stroke in the leading between columns; the
/// computed line height and font size fall back to the configured values.
pub fn stroke_padding(request: &DrawRequest, settings: &ViewSettings) -> f64 {
    if !request.vertical {
        return STROKE_WIDTH;
    }
    let line_height = request
        .line_height
        .filter(|v| *v > 0.0)
        .unwrap_or(settings.line_height * settings.default_font_size);
    let font_size = request
        .font_size
        .filter(|v| *v > 0.0)
        .unwrap_or(settings.default_font_size);
    (line_height - font_size - STROKE_WIDTH) / 2.0
}

/// Builds the primitive for one annotation. `None` when there is nothing to
/// paint.
pub fn draw(
    style: HighlightStyle,
    color: HighlightColor,
    request: &DrawRequest,
    settings: &ViewSettings,
) -> Option<DrawPrimitive> {
    let rects: Vec<Rect> = request
        .rects
        .iter()
        .copied()
        .filter(|r| !r.is_empty())
        .collect();
    if rects.is_empty() {
        return None;
    }
    let color = color.hex().to_string();

    let primitive = match style {
        HighlightStyle::Highlight => DrawPrimitive::Highlight {
            rects,
            color,
            opacity: HIGHLIGHT_OPACITY,
        },
        HighlightStyle::Underline => {
            let padding = stroke_padding(request, settings);
            DrawPrimitive::Underline {
                rects: underline_rects(&rects, request.vertical, padding),
                color,
            }
        }
        HighlightStyle::Squiggly => {
            let padding = stroke_padding(request, settings);
            DrawPrimitive::Squiggly {
                paths: squiggly_paths(&rects, request.vertical, padding),
                color,
                width: STROKE_WIDTH,
            }
        }
    };
    Some(primitive)
}

pub fn underline_rects(rects: &[Rect], vertical: bool, padding: f64) -> Vec<Rect> {
    let shift = padding - STROKE_WIDTH;
    rects
        .iter()
        .map(|r| {
            if vertical {
                Rect::new(r.right - STROKE_WIDTH + shift, r.top, STROKE_WIDTH, r.height())
            } else {
                Rect::new(r.left, r.bottom - STROKE_WIDTH + shift, r.width(), STROKE_WIDTH)
            }
        })
        .collect()
}

pub fn squiggly_paths(rects: &[Rect], vertical: bool, padding: f64) -> Vec<String> {
    let block = STROKE_WIDTH * 1.5;
    let shift = padding - STROKE_WIDTH;
    rects
        .iter()
        .filter_map(|r| {
            let length = if vertical { r.height() } else { r.width() };
            let n = (length / block / 1.5).round() as usize;
            if n == 0 {
                return None;
            }
            let inline = length / n as f64;
            let mut path = if vertical {
                format!("M{} {}", r.right + shift, r.top)
            } else {
                format!("M{} {}", r.left, r.bottom + shift)
            };
            for i in 0..n {
                let wave = if i % 2 == 1 { block } else { -block };
                if vertical {
                    path.push_str(&format!("l{} {inline}", -wave));
                } else {
                    path.push_str(&format!("l{inline} {wave}"));
                }
            }
            Some(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(rects: Vec<Rect>, vertical: bool) -> DrawRequest {
        DrawRequest {
            cfi: "epubcfi(/6/4!/4/2,/1:0,/1:5)".to_string(),
            index: 1,
            rects,
            line_height: None,
            font_size: None,
            vertical,
        }
    }

    #[test]
    fn test_highlight_keeps_rects_and_uses_palette() {
        let req = request(vec![Rect::new(10.0, 10.0, 50.0, 20.0)], false);
        let primitive = draw(
            HighlightStyle::Highlight,
            HighlightColor::Green,
            &req,
            &ViewSettings::default(),
        )
        .unwrap();
        match primitive {
            DrawPrimitive::Highlight { rects, color, opacity } => {
                assert_eq!(rects, req.rects);
                assert_eq!(color, HighlightColor::Green.hex());
                assert_eq!(opacity, 0.3);
            }
            other => panic!("unexpected primitive {other:?}"),
        }
    }

    #[test]
    fn test_horizontal_underline_sits_on_bottom_edge() {
        let req = request(vec![Rect::new(10.0, 10.0, 50.0, 20.0)], false);
        let Some(DrawPrimitive::Underline { rects, .. }) = draw(
            HighlightStyle::Underline,
            HighlightColor::Red,
            &req,
            &ViewSettings::default(),
        ) else {
            panic!("expected underline");
        };
        assert_eq!(rects, vec![Rect::new(10.0, 28.0, 50.0, 2.0)]);
    }

    #[test]
    fn test_vertical_padding_uses_leading() {
        let settings = ViewSettings::default();
        let mut req = request(vec![Rect::new(100.0, 0.0, 16.0, 64.0)], true);
        // 1.6 * 16 = 25.6, minus 16 minus 2, halved.
        assert!((stroke_padding(&req, &settings) - 3.8).abs() < 1e-9);

        req.line_height = Some(30.0);
        req.font_size = Some(20.0);
        assert_eq!(stroke_padding(&req, &settings), 4.0);

        let rects = underline_rects(&req.rects, true, 4.0);
        assert_eq!(rects, vec![Rect::new(116.0, 0.0, 2.0, 64.0)]);
    }

    #[test]
    fn test_squiggly_alternates_direction() {
        let paths = squiggly_paths(&[Rect::new(0.0, 0.0, 18.0, 10.0)], false, STROKE_WIDTH);
        assert_eq!(paths, vec!["M0 10l4.5 -3l4.5 3l4.5 -3l4.5 3".to_string()]);

        let vertical = squiggly_paths(&[Rect::new(0.0, 0.0, 10.0, 9.0)], true, STROKE_WIDTH);
        assert_eq!(vertical, vec!["M10 0l3 4.5l-3 4.5".to_string()]);
    }

    #[test]
    fn test_nothing_to_draw() {
        let req = request(vec![Rect::new(0.0, 0.0, 0.0, 10.0)], false);
        assert!(draw(HighlightStyle::Highlight, HighlightColor::Yellow, &req, &ViewSettings::default()).is_none());
    }
}
