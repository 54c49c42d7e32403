use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::cfi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HighlightStyle {
    #[default]
    Highlight,
    Underline,
    Squiggly,
}

impl HighlightStyle {
    pub const ALL: [HighlightStyle; 3] = [
        HighlightStyle::Highlight,
        HighlightStyle::Underline,
        HighlightStyle::Squiggly,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HighlightColor {
    Red,
    Violet,
    Blue,
    Green,
    #[default]
    Yellow,
}

impl HighlightColor {
    pub const ALL: [HighlightColor; 5] = [
        HighlightColor::Red,
        HighlightColor::Violet,
        HighlightColor::Blue,
        HighlightColor::Green,
        HighlightColor::Yellow,
    ];

    pub fn hex(&self) -> &'static str {
        match self {
            HighlightColor::Red => "#f87171",
            HighlightColor::Violet => "#a78bfa",
            HighlightColor::Blue => "#60a5fa",
            HighlightColor::Green => "#4ade80",
            HighlightColor::Yellow => "#facc15",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    #[default]
    Annotation,
    Bookmark,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NoteContext {
    pub before: String,
    pub after: String,
}

/// Soft-delete marker. Deleted annotations stay in the set so history and
/// undo keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Deleted { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub id: String,
    pub book_id: String,
    pub kind: AnnotationKind,
    pub cfi: String,
    pub style: HighlightStyle,
    pub color: HighlightColor,
    pub text: String,
    pub note: String,
    pub context: Option<NoteContext>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lifecycle: Lifecycle,
}

impl Annotation {
    pub fn is_deleted(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Deleted { .. })
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self.lifecycle {
            Lifecycle::Active => None,
            Lifecycle::Deleted { at } => Some(at),
        }
    }

    /// True when this annotation is anchored at `token`. Tokens are equal
    /// when they parse to the same steps, assertions included; unparsable
    /// tokens fall back to string equality.
    pub fn is_at(&self, token: &str) -> bool {
        match (cfi::Cfi::parse(&self.cfi), cfi::Cfi::parse(token)) {
            (Ok(anchor), Ok(other)) => anchor == other,
            _ => self.cfi == token,
        }
    }
}

/// Wire format, flat `deleted_at` field as stored by note services.
#[derive(Serialize, Deserialize)]
struct AnnotationSerde {
    id: String,
    book_id: String,
    #[serde(rename = "type", default)]
    kind: AnnotationKind,
    cfi: String,
    #[serde(default)]
    style: HighlightStyle,
    #[serde(default)]
    color: HighlightColor,
    #[serde(default)]
    text: String,
    #[serde(default)]
    note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<NoteContext>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted_at: Option<DateTime<Utc>>,
}

impl From<AnnotationSerde> for Annotation {
    fn from(raw: AnnotationSerde) -> Self {
        Annotation {
            id: raw.id,
            book_id: raw.book_id,
            kind: raw.kind,
            cfi: raw.cfi,
            style: raw.style,
            color: raw.color,
            text: raw.text,
            note: raw.note,
            context: raw.context,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            lifecycle: match raw.deleted_at {
                Some(at) => Lifecycle::Deleted { at },
                None => Lifecycle::Active,
            },
        }
    }
}

impl From<&Annotation> for AnnotationSerde {
    fn from(annotation: &Annotation) -> Self {
        AnnotationSerde {
            id: annotation.id.clone(),
            book_id: annotation.book_id.clone(),
            kind: annotation.kind,
            cfi: annotation.cfi.clone(),
            style: annotation.style,
            color: annotation.color,
            text: annotation.text.clone(),
            note: annotation.note.clone(),
            context: annotation.context.clone(),
            created_at: annotation.created_at,
            updated_at: annotation.updated_at,
            deleted_at: annotation.deleted_at(),
        }
    }
}

impl Serialize for Annotation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        AnnotationSerde::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Annotation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        AnnotationSerde::deserialize(deserializer).map(Annotation::from)
    }
}

/// Payload handed to the note service when a highlight or note is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAnnotation {
    pub book_id: String,
    pub kind: AnnotationKind,
    pub cfi: String,
    pub style: HighlightStyle,
    pub color: HighlightColor,
    pub text: String,
    pub note: String,
    pub context: Option<NoteContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<HighlightStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<HighlightColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AnnotationPatch {
    pub fn restyle(style: HighlightStyle, color: HighlightColor) -> Self {
        Self {
            style: Some(style),
            color: Some(color),
            note: None,
        }
    }

    pub fn apply(&self, annotation: &mut Annotation, now: DateTime<Utc>) {
        if let Some(style) = self.style {
            annotation.style = style;
        }
        if let Some(color) = self.color {
            annotation.color = color;
        }
        if let Some(note) = &self.note {
            annotation.note = note.clone();
        }
        annotation.updated_at = now;
    }
}

/// The annotations of one book. Only the annotator mutates it.
#[derive(Debug, Clone, Default)]
pub struct AnnotationSet {
    items: Vec<Annotation>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Annotation>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.items.iter()
    }

    pub fn active(&self) -> impl Iterator<Item = &Annotation> {
        self.items.iter().filter(|a| !a.is_deleted())
    }

    pub fn get(&self, id: &str) -> Option<&Annotation> {
        self.items.iter().find(|a| a.id == id)
    }

    /// The non-deleted annotation anchored at `token`, if any.
    pub fn find_active(&self, token: &str) -> Option<&Annotation> {
        self.active().find(|a| a.is_at(token))
    }

    /// Inserts or replaces by id.
    pub fn upsert(&mut self, annotation: Annotation) {
        match self.items.iter_mut().find(|a| a.id == annotation.id) {
            Some(existing) => *existing = annotation,
            None => self.items.push(annotation),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Annotation> {
        let position = self.items.iter().position(|a| a.id == id)?;
        Some(self.items.remove(position))
    }

    /// Marks the annotation deleted and returns its previous state.
    pub fn soft_delete(&mut self, id: &str, at: DateTime<Utc>) -> Option<Annotation> {
        let annotation = self.items.iter_mut().find(|a| a.id == id)?;
        let previous = annotation.clone();
        annotation.lifecycle = Lifecycle::Deleted { at };
        annotation.updated_at = at;
        Some(previous)
    }

    /// Active annotations whose anchor lies between `start` and `end`
    /// inclusive, in reading order. Anchors that fail to parse are skipped.
    pub fn visible_in(&self, start: &str, end: &str) -> Vec<&Annotation> {
        let (Ok(start), Ok(end)) = (cfi::Cfi::parse(start), cfi::Cfi::parse(end)) else {
            return Vec::new();
        };

        let mut visible: Vec<(cfi::Cfi, &Annotation)> = self
            .active()
            .filter_map(|a| {
                let anchor = cfi::Cfi::parse(&a.cfi).ok()?;
                let inside = anchor.compare(&start) != Ordering::Less
                    && anchor.compare(&end) != Ordering::Greater;
                inside.then_some((anchor, a))
            })
            .collect();
        visible.sort_by(|(a, _), (b, _)| a.compare(b));
        visible.into_iter().map(|(_, a)| a).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn annotation(id: &str, cfi: &str) -> Annotation {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Annotation {
            id: id.to_string(),
            book_id: "book".to_string(),
            kind: AnnotationKind::Annotation,
            cfi: cfi.to_string(),
            style: HighlightStyle::Highlight,
            color: HighlightColor::Yellow,
            text: "text".to_string(),
            note: String::new(),
            context: None,
            created_at: at,
            updated_at: at,
            lifecycle: Lifecycle::Active,
        }
    }

    #[test]
    fn test_serde_uses_flat_deleted_at() {
        let mut deleted = annotation("a1", "epubcfi(/6/4!/4/2,/1:0,/1:5)");
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        deleted.lifecycle = Lifecycle::Deleted { at };

        let json = serde_json::to_value(&deleted).unwrap();
        assert_eq!(json["type"], "annotation");
        assert_eq!(json["style"], "highlight");
        assert!(json["deleted_at"].is_string());

        let back: Annotation = serde_json::from_value(json).unwrap();
        assert_eq!(back.lifecycle, Lifecycle::Deleted { at });
    }

    #[test]
    fn test_missing_deleted_at_means_active() {
        let json = r#"{
            "id": "n1",
            "book_id": "b",
            "cfi": "epubcfi(/6/2!/4/2:0)",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }"#;
        let parsed: Annotation = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.lifecycle, Lifecycle::Active);
        assert_eq!(parsed.color, HighlightColor::Yellow);
    }

    #[test]
    fn test_find_active_ignores_soft_deleted() {
        let token = "epubcfi(/6/4!/4/2,/1:0,/1:5)";
        let mut set = AnnotationSet::from_vec(vec![annotation("a1", token)]);
        assert!(set.find_active(token).is_some());

        let previous = set.soft_delete("a1", Utc::now()).unwrap();
        assert!(!previous.is_deleted());
        assert!(set.find_active(token).is_none());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_anchor_match_is_structural() {
        let a = annotation("a1", "epubcfi(/6/4[chap01ref]!/4/2:0)");
        assert!(a.is_at("epubcfi(/6/4[chap01ref]!/4/2:0)"));
        assert!(a.is_at("/6/4[chap01ref]!/4/2:0"));
        // Same position in reading order, different id assertion.
        assert!(!a.is_at("epubcfi(/6/4[chap02ref]!/4/2:0)"));
        assert!(!a.is_at("epubcfi(/6/4!/4/2:0)"));
        assert!(!a.is_at("not a cfi"));
    }

    #[test]
    fn test_visible_in_is_inclusive_and_ordered() {
        let set = AnnotationSet::from_vec(vec![
            annotation("late", "epubcfi(/6/4!/4/10/3:4)"),
            annotation("early", "epubcfi(/6/4!/4/10/2/1:1)"),
            annotation("outside", "epubcfi(/6/6!/4/2:0)"),
        ]);
        let visible: Vec<&str> = set
            .visible_in("epubcfi(/6/4!/4/10/2/1:1)", "epubcfi(/6/4!/4/10/3:4)")
            .into_iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(visible, vec!["early", "late"]);
    }

    #[test]
    fn test_patch_restyles_in_place() {
        let mut a = annotation("a1", "epubcfi(/6/4!/4/2:0)");
        let now = Utc::now();
        AnnotationPatch::restyle(HighlightStyle::Squiggly, HighlightColor::Blue).apply(&mut a, now);
        assert_eq!(a.style, HighlightStyle::Squiggly);
        assert_eq!(a.color.hex(), "#60a5fa");
        assert_eq!(a.updated_at, now);
    }
}
