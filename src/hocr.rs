//! Recognition-geometry (hOCR) parsing.
//!
//! OCR engines report recognized text as an HTML-like tree where every page,
//! paragraph, line and word node carries a `title="bbox x1 y1 x2 y2"`
//! attribute in pixel coordinates. This module parses that tree into
//! [`RecognitionGeometry`]: one page box plus an ordered list of text spans.
//!
//! The parser matches on *local* element names, so documents that prefix
//! everything with an XML namespace parse the same as plain ones. End-tag
//! name checking is relaxed because real-world hOCR is not always well-formed.

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;

static BBOX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"bbox\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)").unwrap());

/// Pixel-space bounding box, top-left origin, `x2 > x1`, `y2 > y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }
}

/// One recognized word or line with its pixel bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub bbox: PixelBox,
    pub text: String,
}

/// Parsed recognition output for one page.
#[derive(Debug, Clone)]
pub struct RecognitionGeometry {
    /// The page bounding box (origin is normally 0,0).
    pub page: PixelBox,
    /// Paragraph boxes, used only by the debug-boxes rendering mode.
    pub paragraphs: Vec<PixelBox>,
    words: Vec<TextSpan>,
    lines: Vec<TextSpan>,
}

impl RecognitionGeometry {
    /// The spans to render: word-level when the engine produced any,
    /// otherwise line-level as the coarser fallback.
    pub fn spans(&self) -> &[TextSpan] {
        if self.words.is_empty() {
            &self.lines
        } else {
            &self.words
        }
    }

    /// All recognized text joined in reading order (sidecar fallback).
    pub fn plain_text(&self) -> String {
        self.spans()
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Errors from geometry parsing. Both are absorbed per page by the caller.
#[derive(Debug, Error)]
pub enum HocrError {
    /// The markup could not be read at all.
    #[error("malformed recognition output: {0}")]
    Malformed(String),
    /// No page-level bounding box was found.
    #[error("recognition output is missing page dimensions")]
    MissingPageBox,
}

/// Convert a pixel quantity to PDF points at the given DPI.
pub fn pt_from_px(px: u32, dpi: u32) -> f64 {
    px as f64 / dpi as f64 * 72.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanKind {
    Word,
    Line,
}

struct OpenSpan {
    kind: SpanKind,
    bbox: PixelBox,
    text: String,
    depth: usize,
}

/// Parse hOCR markup into [`RecognitionGeometry`].
pub fn parse(input: &str) -> Result<RecognitionGeometry, HocrError> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().check_end_names = false;

    let mut page: Option<PixelBox> = None;
    let mut paragraphs = Vec::new();
    let mut words = Vec::new();
    let mut lines = Vec::new();
    let mut open: Vec<OpenSpan> = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                inspect_element(&e, depth, &mut page, &mut paragraphs, &mut open);
            }
            Ok(Event::Empty(e)) => {
                // Self-closing elements cannot contain text; only the page
                // and paragraph boxes matter here.
                inspect_element(&e, depth + 1, &mut page, &mut paragraphs, &mut Vec::new());
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                while open.last().is_some_and(|s| s.depth > depth) {
                    let span = open.pop().unwrap();
                    let text = span.text.trim().to_string();
                    if !text.is_empty() {
                        let out = TextSpan {
                            bbox: span.bbox,
                            text,
                        };
                        match span.kind {
                            SpanKind::Word => words.push(out),
                            SpanKind::Line => lines.push(out),
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Ok(text) = t.unescape() {
                    for span in open.iter_mut() {
                        span.text.push_str(&text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(HocrError::Malformed(e.to_string())),
        }
    }

    let page = page.ok_or(HocrError::MissingPageBox)?;
    Ok(RecognitionGeometry {
        page,
        paragraphs,
        words,
        lines,
    })
}

fn inspect_element(
    e: &BytesStart<'_>,
    depth: usize,
    page: &mut Option<PixelBox>,
    paragraphs: &mut Vec<PixelBox>,
    open: &mut Vec<OpenSpan>,
) {
    let Some(class) = attribute(e, "class") else {
        return;
    };
    let classes: Vec<&str> = class.split_whitespace().collect();
    let bbox = attribute(e, "title").and_then(|t| parse_bbox(&t));

    if classes.contains(&"ocr_page") {
        // There shouldn't be more than one page box; keep the first.
        if page.is_none() {
            *page = bbox;
        }
    } else if classes.contains(&"ocr_par") {
        if let Some(b) = bbox {
            paragraphs.push(b);
        }
    } else if classes.contains(&"ocrx_word") {
        if let Some(b) = bbox {
            open.push(OpenSpan {
                kind: SpanKind::Word,
                bbox: b,
                text: String::new(),
                depth,
            });
        }
    } else if classes.contains(&"ocr_line") {
        if let Some(b) = bbox {
            open.push(OpenSpan {
                kind: SpanKind::Line,
                bbox: b,
                text: String::new(),
                depth,
            });
        }
    }
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == name.as_bytes() {
            a.unescape_value().ok().map(|v| v.to_string())
        } else {
            None
        }
    })
}

/// Extract `bbox x1 y1 x2 y2` from a title attribute.
fn parse_bbox(title: &str) -> Option<PixelBox> {
    let caps = BBOX.captures(title)?;
    let parse = |i: usize| caps.get(i).and_then(|m| m.as_str().parse().ok());
    Some(PixelBox {
        x1: parse(1)?,
        y1: parse(2)?,
        x2: parse(3)?,
        y2: parse(4)?,
    })
}
