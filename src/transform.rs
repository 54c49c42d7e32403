//! Rewrites of stylesheet and markup fragments as the surface loads them.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use log::{error, warn};
use regex::{Captures, Regex};

use crate::surface::Size;

static VIEWPORT_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d*\.?\d+)(vw|vh)\b").expect("Failed to compile viewport unit regex")
});

static ABSOLUTE_FONT_SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)font-size\s*:\s*(xx-small|x-small|small|medium|large|x-large|xx-large|xxx-large)\b")
        .expect("Failed to compile font size keyword regex")
});

static NOTEREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a\b([^>]*\b(?:epub:type="noteref"|role="doc-noteref")[^>]*)>"#)
        .expect("Failed to compile noteref regex")
});

static FOOTNOTE_ASIDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<aside\b([^>]*\bepub:type="(?:footnote|endnote|rearnote)"[^>]*)>"#)
        .expect("Failed to compile footnote aside regex")
});

const PUNCTUATION_PAIRS: [(char, char); 4] = [('“', '「'), ('”', '」'), ('‘', '『'), ('’', '』')];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Stylesheet,
    Markup,
    Script,
}

impl ContentKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "text/css" => Some(ContentKind::Stylesheet),
            "application/xhtml+xml" | "text/html" => Some(ContentKind::Markup),
            "application/javascript" | "text/javascript" => Some(ContentKind::Script),
            _ => None,
        }
    }
}

/// The transforms installed on a surface. Rebuilt whenever the values it
/// depends on change, so fragments always see current dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentPipeline {
    pub book_id: String,
    pub dimensions: Size,
    pub vertical: bool,
    pub allow_script: bool,
}

impl ContentPipeline {
    pub fn new(book_id: impl Into<String>, dimensions: Size, vertical: bool, allow_script: bool) -> Self {
        Self {
            book_id: book_id.into(),
            dimensions,
            vertical,
            allow_script,
        }
    }

    /// Transforms one fragment. On failure the original is passed through.
    pub fn apply(&self, kind: ContentKind, data: &str) -> String {
        let result = match kind {
            ContentKind::Stylesheet => transform_stylesheet(self.dimensions, data),
            ContentKind::Markup => Ok(transform_markup(data, self.vertical)),
            ContentKind::Script => {
                if self.allow_script {
                    Ok(data.to_string())
                } else {
                    warn!("Blocked script in {}", self.book_id);
                    Ok(String::new())
                }
            }
        };
        result.unwrap_or_else(|e| {
            error!("Failed to transform content for {}: {e:#}", self.book_id);
            data.to_string()
        })
    }
}

/// Resolves viewport units against the pane and absolute font-size keywords
/// to rem.
pub fn transform_stylesheet(dimensions: Size, css: &str) -> Result<String> {
    let mut failure = None;
    let css = VIEWPORT_UNIT_RE.replace_all(css, |caps: &Captures| {
        let parsed = caps[1]
            .parse::<f64>()
            .with_context(|| format!("Invalid viewport length {:?}", &caps[0]));
        match parsed {
            Ok(value) => {
                let base = if caps[2].eq_ignore_ascii_case("vw") {
                    dimensions.width
                } else {
                    dimensions.height
                };
                format!("{}px", value * base / 100.0)
            }
            Err(e) => {
                failure.get_or_insert(e);
                caps[0].to_string()
            }
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }

    let css = ABSOLUTE_FONT_SIZE_RE.replace_all(&css, |caps: &Captures| {
        let rem = match caps[1].to_ascii_lowercase().as_str() {
            "xx-small" => "0.6",
            "x-small" => "0.75",
            "small" => "0.875",
            "medium" => "1",
            "large" => "1.2",
            "x-large" => "1.5",
            "xx-large" => "2",
            _ => "3",
        };
        format!("font-size: {rem}rem")
    });
    Ok(css.into_owned())
}

pub fn transform_markup(html: &str, vertical: bool) -> String {
    let html = if vertical {
        transform_punctuation(html)
    } else {
        html.to_string()
    };
    mark_footnotes(&html)
}

/// Curly quotes to CJK corner brackets for vertical text.
pub fn transform_punctuation(text: &str) -> String {
    text.chars()
        .map(|c| {
            PUNCTUATION_PAIRS
                .iter()
                .find(|(from, _)| *from == c)
                .map_or(c, |(_, to)| *to)
        })
        .collect()
}

/// Undoes [`transform_punctuation`] so copied text matches the source.
pub fn reverse_punctuation(text: &str) -> String {
    text.chars()
        .map(|c| {
            PUNCTUATION_PAIRS
                .iter()
                .find(|(_, to)| *to == c)
                .map_or(c, |(from, _)| *from)
        })
        .collect()
}

fn mark_footnotes(html: &str) -> String {
    let html = NOTEREF_RE.replace_all(html, |caps: &Captures| {
        if caps[1].contains("data-footnote-ref") {
            caps[0].to_string()
        } else {
            format!("<a{} data-footnote-ref=\"true\">", &caps[1])
        }
    });
    FOOTNOTE_ASIDE_RE
        .replace_all(&html, |caps: &Captures| {
            if caps[1].contains("hidden") {
                caps[0].to_string()
            } else {
                format!("<aside{} hidden=\"hidden\">", &caps[1])
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_units_become_pixels() {
        let css = "div { width: 50vw; height: 25vh; margin: .5VW; }";
        let out = transform_stylesheet(Size::new(800.0, 600.0), css).unwrap();
        assert_eq!(out, "div { width: 400px; height: 150px; margin: 4px; }");
    }

    #[test]
    fn test_font_size_keywords_become_rem() {
        let out = transform_stylesheet(Size::default(), "p { font-size: x-large; }").unwrap();
        assert_eq!(out, "p { font-size: 1.5rem; }");
    }

    #[test]
    fn test_punctuation_round_trip() {
        let source = "“Hello,” she said, ‘quietly’.";
        let vertical = transform_punctuation(source);
        assert_eq!(vertical, "「Hello,」 she said, 『quietly』.");
        assert_eq!(reverse_punctuation(&vertical), source);
    }

    #[test]
    fn test_markup_marks_noterefs_and_hides_asides() {
        let html = r##"<p>Text<a epub:type="noteref" href="#n1">1</a></p><aside epub:type="footnote" id="n1">Note</aside>"##;
        let out = transform_markup(html, false);
        assert!(out.contains(r##"<a epub:type="noteref" href="#n1" data-footnote-ref="true">"##));
        assert!(out.contains(r#"<aside epub:type="footnote" id="n1" hidden="hidden">"#));
        assert_eq!(transform_markup(&out, false), out);
    }

    #[test]
    fn test_pipeline_gates_scripts() {
        let mut pipeline = ContentPipeline::new("b1", Size::new(100.0, 100.0), false, false);
        assert_eq!(pipeline.apply(ContentKind::Script, "alert(1)"), "");
        pipeline.allow_script = true;
        assert_eq!(pipeline.apply(ContentKind::Script, "alert(1)"), "alert(1)");
    }

    #[test]
    fn test_pipeline_uses_vertical_flag_for_markup() {
        let pipeline = ContentPipeline::new("b1", Size::default(), true, false);
        assert_eq!(pipeline.apply(ContentKind::Markup, "<p>“a”</p>"), "<p>「a」</p>");
        assert_eq!(ContentKind::from_mime("text/css"), Some(ContentKind::Stylesheet));
        assert_eq!(ContentKind::from_mime("image/png"), None);
    }
}
