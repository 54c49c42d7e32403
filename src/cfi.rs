//! EPUB canonical fragment identifiers.
//!
//! Locations inside a flowing document are carried around as opaque CFI
//! strings (`epubcfi(/6/4!/4/10/2:3)`). This module parses them, collapses
//! range tokens to one of their boundaries and orders them in reading order.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CfiError {
    #[error("empty location token")]
    Empty,

    #[error("unexpected character {found:?} at {position} in location token")]
    UnexpectedChar { found: char, position: usize },

    #[error("expected a number at {position} in location token")]
    ExpectedNumber { position: usize },

    #[error("unterminated assertion starting at {position}")]
    UnterminatedAssertion { position: usize },

    #[error("range token must have exactly three parts, found {0}")]
    MalformedRange(usize),

    #[error("assertion or offset at {position} has no step to attach to")]
    DanglingModifier { position: usize },
}

/// Side bias of a character offset (`;s=b` / `;s=a`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Step {
    pub index: u32,
    pub id: Option<String>,
    pub offset: Option<u32>,
    pub temporal: Option<f64>,
    pub spatial: Option<(f64, f64)>,
    pub text: Vec<String>,
    pub side: Option<Side>,
}

impl Step {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn with_offset(index: u32, offset: u32) -> Self {
        Self {
            index,
            offset: Some(offset),
            ..Default::default()
        }
    }

    fn has_terminal(&self) -> bool {
        self.offset.is_some() || self.temporal.is_some() || self.spatial.is_some()
    }
}

/// Steps grouped by indirection (`!`) boundaries.
pub type Path = Vec<Vec<Step>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Cfi {
    Point(Path),
    Range { parent: Path, start: Path, end: Path },
}

impl Cfi {
    pub fn parse(input: &str) -> Result<Self, CfiError> {
        let inner = unwrap(input.trim());
        if inner.is_empty() {
            return Err(CfiError::Empty);
        }

        let tokens = tokenize(inner)?;
        let mut segments: Vec<Vec<(Token, usize)>> = vec![Vec::new()];
        for (token, position) in tokens {
            if token == Token::Comma {
                segments.push(Vec::new());
            } else if let Some(last) = segments.last_mut() {
                last.push((token, position));
            }
        }

        match segments.len() {
            1 => {
                let (lead, path) = build_path(&segments[0])?;
                if let Some((_, position)) = lead {
                    return Err(CfiError::DanglingModifier { position });
                }
                Ok(Cfi::Point(path))
            }
            3 => {
                let (parent_lead, mut parent) = build_path(&segments[0])?;
                if let Some((_, position)) = parent_lead {
                    return Err(CfiError::DanglingModifier { position });
                }
                let (start_lead, mut start) = build_path(&segments[1])?;
                let (end_lead, mut end) = build_path(&segments[2])?;

                // `epubcfi(/6/4!/4/2/1,:3,:9)`: offsets without their own step
                // belong to the parent's final step.
                if start_lead.is_some() || end_lead.is_some() {
                    let anchor = parent
                        .last_mut()
                        .and_then(|part| part.pop())
                        .ok_or(CfiError::MalformedRange(3))?;
                    start = graft(&anchor, start_lead.map(|(tail, _)| tail), start);
                    end = graft(&anchor, end_lead.map(|(tail, _)| tail), end);
                }

                Ok(Cfi::Range { parent, start, end })
            }
            n => Err(CfiError::MalformedRange(n)),
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Cfi::Range { .. })
    }

    /// The start (or end) boundary of a range token. Points are returned as-is.
    pub fn collapse(&self, to_end: bool) -> Cfi {
        match self {
            Cfi::Point(path) => Cfi::Point(path.clone()),
            Cfi::Range { parent, start, end } => {
                let tail = if to_end { end } else { start };
                Cfi::Point(concat_paths(parent, tail))
            }
        }
    }

    /// Reading-order comparison. Ranges compare by their start boundary, then
    /// by their end boundary.
    pub fn compare(&self, other: &Cfi) -> Ordering {
        if self.is_range() || other.is_range() {
            let a_start = self.collapse(false);
            let b_start = other.collapse(false);
            return compare_paths(a_start.path(), b_start.path()).then_with(|| {
                compare_paths(self.collapse(true).path(), other.collapse(true).path())
            });
        }
        compare_paths(self.path(), other.path())
    }

    fn path(&self) -> &Path {
        match self {
            Cfi::Point(path) => path,
            Cfi::Range { parent, .. } => parent,
        }
    }
}

impl FromStr for Cfi {
    type Err = CfiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cfi::parse(s)
    }
}

impl fmt::Display for Cfi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epubcfi(")?;
        match self {
            Cfi::Point(path) => write_path(f, path)?,
            Cfi::Range { parent, start, end } => {
                write_path(f, parent)?;
                write!(f, ",")?;
                write_path(f, start)?;
                write!(f, ",")?;
                write_path(f, end)?;
            }
        }
        write!(f, ")")
    }
}

/// Collapse a token string to its start (or end) boundary.
pub fn collapse(token: &str, to_end: bool) -> Result<String, CfiError> {
    Ok(Cfi::parse(token)?.collapse(to_end).to_string())
}

/// Compare two token strings in reading order.
pub fn compare(a: &str, b: &str) -> Result<Ordering, CfiError> {
    Ok(Cfi::parse(a)?.compare(&Cfi::parse(b)?))
}

/// True when `token` lies between the collapsed boundaries of `range`,
/// inclusive on both ends.
pub fn in_range(token: &str, range: &str) -> Result<bool, CfiError> {
    let range = Cfi::parse(range)?;
    let token = Cfi::parse(token)?;
    let start = range.collapse(false);
    let end = range.collapse(true);
    Ok(token.compare(&start) != Ordering::Less && token.compare(&end) != Ordering::Greater)
}

fn unwrap(input: &str) -> &str {
    input
        .strip_prefix("epubcfi(")
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(input)
}

fn compare_paths(a: &Path, b: &Path) -> Ordering {
    let empty: Vec<Step> = Vec::new();
    for i in 0..a.len().max(b.len()) {
        let p = a.get(i).unwrap_or(&empty);
        let q = b.get(i).unwrap_or(&empty);
        let len = p.len().max(q.len());
        for j in 0..len {
            let (x, y) = match (p.get(j), q.get(j)) {
                (None, None) => break,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(x), Some(y)) => (x, y),
            };
            match x.index.cmp(&y.index) {
                Ordering::Equal => {}
                other => return other,
            }
            if j + 1 == len {
                match x.offset.cmp(&y.offset) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
        }
    }
    Ordering::Equal
}

fn concat_paths(parent: &Path, tail: &Path) -> Path {
    let mut joined: Path = parent.clone();
    let mut rest = tail.iter();
    if let Some(first) = rest.next() {
        match joined.last_mut() {
            Some(last) => last.extend(first.iter().cloned()),
            None => joined.push(first.clone()),
        }
    }
    joined.extend(rest.cloned());
    joined
}

fn graft(anchor: &Step, tail: Option<Step>, path: Path) -> Path {
    let mut step = Step {
        index: anchor.index,
        id: anchor.id.clone(),
        ..Default::default()
    };
    if let Some(tail) = tail {
        step.offset = tail.offset;
        step.temporal = tail.temporal;
        step.spatial = tail.spatial;
        step.text = tail.text;
        step.side = tail.side;
    }
    let mut grafted: Path = vec![vec![step]];
    let mut parts = path.into_iter();
    if let Some(first) = parts.next() {
        grafted[0].extend(first);
    }
    grafted.extend(parts);
    grafted
}

fn write_path(f: &mut fmt::Formatter<'_>, path: &Path) -> fmt::Result {
    for (i, part) in path.iter().enumerate() {
        if i > 0 {
            write!(f, "!")?;
        }
        for step in part {
            write!(f, "/{}", step.index)?;
            if let Some(id) = &step.id {
                write!(f, "[{}]", escape(id))?;
            }
            if let Some(offset) = step.offset {
                write!(f, ":{offset}")?;
            }
            if let Some(temporal) = step.temporal {
                write!(f, "~{temporal}")?;
            }
            if let Some((x, y)) = step.spatial {
                write!(f, "@{x}:{y}")?;
            }
            if !step.text.is_empty() || step.side.is_some() {
                let text: Vec<String> = step.text.iter().map(|t| escape(t)).collect();
                write!(f, "[{}", text.join(","))?;
                match step.side {
                    Some(Side::Before) => write!(f, ";s=b")?,
                    Some(Side::After) => write!(f, ";s=a")?,
                    None => {}
                }
                write!(f, "]")?;
            }
        }
    }
    Ok(())
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '^' | '[' | ']' | '(' | ')' | ',' | ';' | '=') {
            out.push('^');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Step(u32),
    Offset(u32),
    Temporal(f64),
    Spatial(f64, f64),
    Assertion(String),
    Indirection,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, CfiError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let position = i;
        match chars[i] {
            '/' => {
                let (n, next) = read_integer(&chars, i + 1)?;
                tokens.push((Token::Step(n), position));
                i = next;
            }
            ':' => {
                let (n, next) = read_integer(&chars, i + 1)?;
                tokens.push((Token::Offset(n), position));
                i = next;
            }
            '~' => {
                let (t, next) = read_float(&chars, i + 1)?;
                tokens.push((Token::Temporal(t), position));
                i = next;
            }
            '@' => {
                let (x, next) = read_float(&chars, i + 1)?;
                if chars.get(next) != Some(&':') {
                    return Err(CfiError::ExpectedNumber { position: next });
                }
                let (y, next) = read_float(&chars, next + 1)?;
                tokens.push((Token::Spatial(x, y), position));
                i = next;
            }
            '[' => {
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(CfiError::UnterminatedAssertion { position }),
                        Some('^') => {
                            if let Some(escaped) = chars.get(j + 1) {
                                value.push('^');
                                value.push(*escaped);
                            }
                            j += 2;
                        }
                        Some(']') => break,
                        Some(c) => {
                            value.push(*c);
                            j += 1;
                        }
                    }
                }
                tokens.push((Token::Assertion(value), position));
                i = j + 1;
            }
            '!' => {
                tokens.push((Token::Indirection, position));
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, position));
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            found => return Err(CfiError::UnexpectedChar { found, position }),
        }
    }

    Ok(tokens)
}

fn read_integer(chars: &[char], start: usize) -> Result<(u32, usize), CfiError> {
    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    let digits: String = chars[start..end].iter().collect();
    let n = digits
        .parse::<u32>()
        .map_err(|_| CfiError::ExpectedNumber { position: start })?;
    Ok((n, end))
}

fn read_float(chars: &[char], start: usize) -> Result<(f64, usize), CfiError> {
    let mut end = start;
    while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
        end += 1;
    }
    let digits: String = chars[start..end].iter().collect();
    let n = digits
        .parse::<f64>()
        .map_err(|_| CfiError::ExpectedNumber { position: start })?;
    Ok((n, end))
}

/// Splits an assertion body on unescaped `sep`, dropping escape markers.
fn split_unescaped(value: &str, sep: char) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '^' {
            if let (Some(next), Some(last)) = (chars.next(), parts.last_mut()) {
                last.push(next);
            }
        } else if c == sep {
            parts.push(String::new());
        } else if let Some(last) = parts.last_mut() {
            last.push(c);
        }
    }
    parts
}

fn apply_assertion(step: &mut Step, body: &str) {
    let mut pieces = split_unescaped_keep(body, ';').into_iter();
    let head = pieces.next().unwrap_or_default();
    let params: Vec<String> = pieces.collect();

    if step.has_terminal() {
        if !head.is_empty() {
            step.text = split_unescaped(&head, ',');
        }
    } else if !head.is_empty() {
        step.id = split_unescaped(&head, '\u{0}').into_iter().next();
    }

    for param in params {
        if let Some(side) = param.strip_prefix("s=") {
            step.side = match side {
                "b" => Some(Side::Before),
                "a" => Some(Side::After),
                _ => step.side,
            };
        }
    }
}

/// Like `split_unescaped` but keeps escape markers in the pieces so they
/// can be split again.
fn split_unescaped_keep(value: &str, sep: char) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '^' {
            if let (Some(next), Some(last)) = (chars.next(), parts.last_mut()) {
                last.push('^');
                last.push(next);
            }
        } else if c == sep {
            parts.push(String::new());
        } else if let Some(last) = parts.last_mut() {
            last.push(c);
        }
    }
    parts
}

type Lead = Option<(Step, usize)>;

/// Builds a path from tokens. Modifiers that appear before the first step are
/// returned separately so range boundaries like `:5` can be grafted onto the
/// parent.
fn build_path(tokens: &[(Token, usize)]) -> Result<(Lead, Path), CfiError> {
    let mut path: Path = vec![Vec::new()];
    let mut lead: Lead = None;

    for (token, position) in tokens {
        let position = *position;
        if let Token::Step(index) = token {
            if let Some(part) = path.last_mut() {
                part.push(Step::new(*index));
            }
            continue;
        }
        if *token == Token::Indirection {
            path.push(Vec::new());
            continue;
        }

        let at_root = path.len() == 1;
        let step = match path.last_mut().and_then(|part| part.last_mut()) {
            Some(step) => step,
            None if at_root => &mut lead.get_or_insert_with(|| (Step::default(), position)).0,
            None => return Err(CfiError::DanglingModifier { position }),
        };

        match token {
            Token::Offset(n) => step.offset = Some(*n),
            Token::Temporal(t) => step.temporal = Some(*t),
            Token::Spatial(x, y) => step.spatial = Some((*x, *y)),
            Token::Assertion(body) => apply_assertion(step, body),
            Token::Step(_) | Token::Indirection | Token::Comma => {}
        }
    }

    if path.len() == 1 && path[0].is_empty() {
        path.clear();
    }
    Ok((lead, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point_with_indirection_and_offset() {
        let cfi = Cfi::parse("epubcfi(/6/4[chap01ref]!/4[body01]/10[para05]/3:10)").unwrap();
        let Cfi::Point(path) = &cfi else {
            panic!("expected a point");
        };
        assert_eq!(path.len(), 2);
        assert_eq!(path[0][1].id.as_deref(), Some("chap01ref"));
        assert_eq!(path[1].len(), 3);
        assert_eq!(path[1][2].index, 3);
        assert_eq!(path[1][2].offset, Some(10));
    }

    #[test]
    fn test_display_round_trip_keeps_structure() {
        let source = "epubcfi(/6/4[chap01ref]!/4[body01]/10[para05],/2/1:1,/3:4)";
        let parsed = Cfi::parse(source).unwrap();
        assert_eq!(parsed.to_string(), source);
    }

    #[test]
    fn test_text_assertion_and_side() {
        let cfi = Cfi::parse("epubcfi(/6/4!/4/2/1:3[xx,y^,y;s=b])").unwrap();
        let Cfi::Point(path) = cfi else {
            panic!("expected a point");
        };
        let step = &path[1][2];
        assert_eq!(step.text, vec!["xx".to_string(), "y,y".to_string()]);
        assert_eq!(step.side, Some(Side::Before));
    }

    #[test]
    fn test_collapse_range() {
        let range = "epubcfi(/6/4!/4/10,/2/1:1,/3:4)";
        assert_eq!(collapse(range, false).unwrap(), "epubcfi(/6/4!/4/10/2/1:1)");
        assert_eq!(collapse(range, true).unwrap(), "epubcfi(/6/4!/4/10/3:4)");
    }

    #[test]
    fn test_collapse_offset_only_range() {
        let range = "epubcfi(/6/4!/4/2/1,:3,:9)";
        assert_eq!(collapse(range, false).unwrap(), "epubcfi(/6/4!/4/2/1:3)");
        assert_eq!(collapse(range, true).unwrap(), "epubcfi(/6/4!/4/2/1:9)");
    }

    #[test]
    fn test_collapse_point_is_identity() {
        let point = "epubcfi(/6/8!/4/2:0)";
        assert_eq!(collapse(point, true).unwrap(), point);
    }

    #[test]
    fn test_compare_orders_by_step_then_offset() {
        assert_eq!(
            compare("epubcfi(/6/4!/4/2:5)", "epubcfi(/6/4!/4/2:9)").unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare("epubcfi(/6/6!/4/2:0)", "epubcfi(/6/4!/4/20:0)").unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            compare("epubcfi(/6/4!/4/2:5)", "epubcfi(/6/4!/4/2:5)").unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn test_ancestor_precedes_descendant() {
        assert_eq!(
            compare("epubcfi(/6/4!/4)", "epubcfi(/6/4!/4/2/1:0)").unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare("epubcfi(/6/4)", "epubcfi(/6/4!/4)").unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn test_compare_is_a_total_order_on_samples() {
        let samples = [
            "epubcfi(/6/2!/4/2:0)",
            "epubcfi(/6/4!/4)",
            "epubcfi(/6/4!/4/2/1:0)",
            "epubcfi(/6/4!/4/2/1:7)",
            "epubcfi(/6/4!/4/2/3:1)",
            "epubcfi(/6/4!/4/10,/2/1:1,/3:4)",
            "epubcfi(/6/4!/4/10/2/1:1)",
            "epubcfi(/6/6!/4/2:0)",
        ];
        let parsed: Vec<Cfi> = samples.iter().map(|s| Cfi::parse(s).unwrap()).collect();

        for a in &parsed {
            for b in &parsed {
                assert_eq!(a.compare(b), b.compare(a).reverse());
                for c in &parsed {
                    if a.compare(b) != Ordering::Greater && b.compare(c) != Ordering::Greater {
                        assert_ne!(a.compare(c), Ordering::Greater, "{a} <= {b} <= {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_collapsed_start_never_after_end() {
        let ranges = [
            "epubcfi(/6/4!/4/10,/2/1:1,/3:4)",
            "epubcfi(/6/4!/4/2/1,:3,:9)",
            "epubcfi(/6/4!/4,/2/1:0,/2/1:0)",
        ];
        for range in ranges {
            let cfi = Cfi::parse(range).unwrap();
            assert_ne!(
                cfi.collapse(false).compare(&cfi.collapse(true)),
                Ordering::Greater
            );
        }
    }

    #[test]
    fn test_in_range_is_inclusive() {
        let range = "epubcfi(/6/4!/4/10,/2/1:1,/3:4)";
        assert!(in_range("epubcfi(/6/4!/4/10/2/1:1)", range).unwrap());
        assert!(in_range("epubcfi(/6/4!/4/10/3:4)", range).unwrap());
        assert!(in_range("epubcfi(/6/4!/4/10/2/5:0)", range).unwrap());
        assert!(!in_range("epubcfi(/6/4!/4/10/3:5)", range).unwrap());
        assert!(!in_range("epubcfi(/6/4!/4/8:0)", range).unwrap());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Cfi::parse(""), Err(CfiError::Empty));
        assert!(matches!(
            Cfi::parse("epubcfi(/6/x)"),
            Err(CfiError::ExpectedNumber { .. })
        ));
        assert!(matches!(
            Cfi::parse("epubcfi(/6/4[abc)"),
            Err(CfiError::UnterminatedAssertion { .. })
        ));
        assert!(matches!(
            Cfi::parse("epubcfi(/6,/4)"),
            Err(CfiError::MalformedRange(2))
        ));
    }
}
