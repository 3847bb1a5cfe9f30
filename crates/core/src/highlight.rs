use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edn::parse_edn;
use crate::error::{AskPdfError, Result};

/// Box in the coordinate space of the canvas the highlight was captured on.
/// `width`/`height` are that canvas' size, not the size of the box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighlightContent {
    pub text: String,
    /// Present for area (image) highlights; the value itself is opaque.
    pub image: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighlightPosition {
    /// 1-based page number.
    pub page: u32,
    pub bounding: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Highlight {
    pub id: String,
    pub content: HighlightContent,
    pub position: HighlightPosition,
}

impl Highlight {
    pub fn is_image(&self) -> bool {
        self.content.image.is_some()
    }
}

/// Highlights of one PDF in sidecar order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationSet {
    highlights: Vec<Highlight>,
}

impl AnnotationSet {
    pub fn new(highlights: Vec<Highlight>) -> Self {
        Self { highlights }
    }

    pub fn from_edn_str(source: &str) -> Result<Self> {
        let value = parse_edn(source)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let records = value
            .get("highlights")
            .and_then(Value::as_array)
            .ok_or(AskPdfError::MissingHighlights)?;
        let mut highlights = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            highlights.push(decode_highlight(index, record)?);
        }
        Ok(Self { highlights })
    }

    /// First highlight whose id equals `id`.
    pub fn find(&self, id: &str) -> Option<&Highlight> {
        self.highlights.iter().find(|highlight| highlight.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Highlight> {
        self.highlights.iter()
    }

    pub fn len(&self) -> usize {
        self.highlights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty()
    }
}

fn decode_highlight(index: usize, record: &Value) -> Result<Highlight> {
    match record.get("id") {
        None | Some(Value::Null) => return Err(AskPdfError::MissingHighlightId { index }),
        Some(_) => {}
    }
    let raw: RawHighlight =
        serde_json::from_value(record.clone()).map_err(|e| AskPdfError::InvalidHighlight {
            index,
            reason: e.to_string(),
        })?;
    let id = match raw.id {
        RawId::Plain(id) => id,
        RawId::Tagged { val } => val,
    };
    if id.trim().is_empty() {
        return Err(AskPdfError::MissingHighlightId { index });
    }
    Ok(Highlight {
        id,
        content: HighlightContent {
            text: raw.content.text,
            image: raw.content.image,
        },
        position: HighlightPosition {
            page: raw.position.page,
            bounding: raw.position.bounding,
        },
    })
}

#[derive(Deserialize)]
struct RawHighlight {
    id: RawId,
    #[serde(default)]
    content: RawContent,
    position: RawPosition,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Plain(String),
    Tagged { val: String },
}

#[derive(Deserialize, Default)]
struct RawContent {
    #[serde(default)]
    text: String,
    #[serde(default)]
    image: Option<f64>,
}

#[derive(Deserialize)]
struct RawPosition {
    page: u32,
    bounding: BoundingBox,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIDECAR: &str = r#"
        {:highlights
         [{:id #uuid "aaaaaaaa-0000-4000-8000-000000000001"
           :page 1
           :position {:bounding {:x1 100 :y1 200 :x2 300 :y2 260 :width 600 :height 800}
                      :rects () :page 1}
           :content {:text "gradient descent"}
           :properties {:color "yellow"}}
          {:id #uuid "aaaaaaaa-0000-4000-8000-000000000002"
           :page 2
           :position {:bounding {:x1 150 :y1 200 :x2 450 :y2 600 :width 600 :height 800}
                      :rects () :page 2}
           :content {:text "[:span]" :image 1690000000000}
           :properties {:color "green"}}]
         :extra {:page 2}}
    "#;

    #[test]
    fn decodes_text_and_image_highlights() {
        let set = AnnotationSet::from_edn_str(SIDECAR).unwrap();
        assert_eq!(set.len(), 2);
        let text = set.find("aaaaaaaa-0000-4000-8000-000000000001").unwrap();
        assert!(!text.is_image());
        assert_eq!(text.content.text, "gradient descent");
        assert_eq!(text.position.page, 1);
        assert_eq!(text.position.bounding.x2, 300.0);

        let image = set.find("aaaaaaaa-0000-4000-8000-000000000002").unwrap();
        assert!(image.is_image());
        assert_eq!(image.position.page, 2);
        assert_eq!(image.position.bounding.height, 800.0);
    }

    #[test]
    fn find_returns_first_match_in_source_order() {
        let set = AnnotationSet::from_edn_str(
            r#"{:highlights [{:id "a" :content {:text "first"}
                              :position {:page 1 :bounding {:x1 0 :y1 0 :x2 1 :y2 1 :width 1 :height 1}}}
                             {:id "b" :content {:text "second"}
                              :position {:page 1 :bounding {:x1 0 :y1 0 :x2 1 :y2 1 :width 1 :height 1}}}
                             {:id "a" :content {:text "duplicate"}
                              :position {:page 1 :bounding {:x1 0 :y1 0 :x2 1 :y2 1 :width 1 :height 1}}}]}"#,
        )
        .unwrap();
        assert_eq!(set.find("b").unwrap().content.text, "second");
        assert_eq!(set.find("a").unwrap().content.text, "first");
        assert!(set.find("c").is_none());
    }

    #[test]
    fn document_without_highlights_is_rejected() {
        let err = AnnotationSet::from_edn_str("{:extra {:page 1}}").unwrap_err();
        assert!(matches!(err, AskPdfError::MissingHighlights));
        let err = AnnotationSet::from_edn_str("[1 2 3]").unwrap_err();
        assert!(matches!(err, AskPdfError::MissingHighlights));
    }

    #[test]
    fn highlight_without_id_is_rejected() {
        let err = AnnotationSet::from_edn_str(
            r#"{:highlights [{:content {:text "x"}
                              :position {:page 1 :bounding {:x1 0 :y1 0 :x2 1 :y2 1 :width 1 :height 1}}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, AskPdfError::MissingHighlightId { index: 0 }));
    }

    #[test]
    fn malformed_position_reports_index() {
        let err = AnnotationSet::from_edn_str(
            r#"{:highlights [{:id "ok" :position {:page 1 :bounding {:x1 0 :y1 0 :x2 1 :y2 1 :width 1 :height 1}}}
                             {:id "bad" :position {:page "one"}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, AskPdfError::InvalidHighlight { index: 1, .. }));
    }

    #[test]
    fn empty_highlight_list_is_valid() {
        let set = AnnotationSet::from_edn_str("{:highlights []}").unwrap();
        assert!(set.is_empty());
    }
}
