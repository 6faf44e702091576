//! Invisible-text PDF page synthesis from recognition geometry.
//!
//! Each span's bounding box fully determines how its text is drawn:
//!
//! * the origin is the box's bottom-left corner, flipped into PDF's
//!   bottom-up coordinate system (`y = pageHeight − y2`),
//! * the font size is the box's height in points,
//! * the horizontal scale (`Tz`) stretches the string's natural Helvetica
//!   width to exactly the box width, compensating for the metric mismatch
//!   between whatever font the scan used and the one we measure with,
//! * text render mode 3 makes the glyphs invisible while keeping them
//!   searchable and selectable.
//!
//! Pages are sized from the page-level bounding box via
//! `pt = px / dpi × 72`. A debug mode draws visible dashed boxes instead,
//! for checking geometry alignment against the scanned image.
//!
//! Text is written in WinAnsi encoding with the built-in (non-embedded)
//! Helvetica, the classic choice for OCR text layers: every viewer has it
//! and the file stays small. Ligature characters are expanded to their
//! ASCII pairs first so searching for "fi" matches what the engine saw.

use crate::hocr::{pt_from_px, RecognitionGeometry};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};

/// Replace characters that would defeat search or have no WinAnsi slot.
pub fn replace_unsupported_chars(text: &str) -> String {
    text.replace('\u{FB01}', "fi").replace('\u{FB02}', "fl")
}

/// Map a character to its WinAnsi byte, if it has one.
pub fn encode_win_ansi_char(c: char) -> Option<u8> {
    let cp = c as u32;
    match cp {
        // ASCII block maps straight through.
        0x20..=0x7E => Some(cp as u8),
        // Latin-1 supplement shares codepoints with WinAnsi.
        0xA0..=0xFF => Some(cp as u8),
        // Windows-1252 specials.
        0x20AC => Some(0x80), // €
        0x201A => Some(0x82),
        0x0192 => Some(0x83),
        0x201E => Some(0x84),
        0x2026 => Some(0x85),
        0x2020 => Some(0x86),
        0x2021 => Some(0x87),
        0x02C6 => Some(0x88),
        0x2030 => Some(0x89),
        0x0160 => Some(0x8A),
        0x2039 => Some(0x8B),
        0x0152 => Some(0x8C),
        0x017D => Some(0x8E),
        0x2018 => Some(0x91),
        0x2019 => Some(0x92),
        0x201C => Some(0x93),
        0x201D => Some(0x94),
        0x2022 => Some(0x95),
        0x2013 => Some(0x96),
        0x2014 => Some(0x97),
        0x02DC => Some(0x98),
        0x2122 => Some(0x99),
        0x0161 => Some(0x9A),
        0x203A => Some(0x9B),
        0x0153 => Some(0x9C),
        0x017E => Some(0x9E),
        0x0178 => Some(0x9F),
        _ => None,
    }
}

/// Encode a string to WinAnsi bytes; unencodable characters become `?` so
/// span widths stay non-degenerate and the text remains greppable.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| encode_win_ansi_char(c).unwrap_or(b'?'))
        .collect()
}

/// Helvetica advance width in 1/1000 em for a WinAnsi byte.
///
/// Values from the Adobe base-14 Helvetica AFM.
pub fn helvetica_width_units(byte: u8) -> u16 {
    match byte {
        b' ' | b',' | b'.' | b'/' | b':' | b';' | b'!' => 278,
        b'"' => 355,
        b'#' | b'$' | b'0'..=b'9' | b'?' | b'_' => 556,
        b'%' => 889,
        b'&' => 667,
        b'\'' => 191,
        b'(' | b')' | b'-' | b'`' | b'r' => 333,
        b'*' => 389,
        b'+' | b'<' | b'=' | b'>' | b'~' | b'^' => 584,
        b'@' => 1015,
        b'A' | b'B' | b'E' | b'K' | b'P' | b'S' | b'V' | b'X' | b'Y' => 667,
        b'C' | b'D' | b'H' | b'N' | b'R' | b'U' => 722,
        b'F' | b'T' | b'Z' => 611,
        b'G' | b'O' | b'Q' => 778,
        b'I' | b'[' | b']' | b'\\' | b'f' | b't' => 278,
        b'J' | b'c' | b'k' | b's' | b'v' | b'x' | b'y' | b'z' => 500,
        b'L' => 556,
        b'M' => 833,
        b'W' => 944,
        b'a' | b'b' | b'd' | b'e' | b'g' | b'h' | b'n' | b'o' | b'p' | b'q' | b'u' => 556,
        b'i' | b'j' | b'l' => 222,
        b'm' => 833,
        b'w' => 722,
        b'{' | b'}' => 334,
        b'|' => 260,
        // Windows-1252 upper half.
        0x80 => 556,          // Euro
        0x82 | 0x91 | 0x92 => 222,
        0x83 => 556,
        0x84 | 0x88 | 0x8B | 0x93 | 0x94 | 0x98 | 0x9B => 333,
        0x85 | 0x89 | 0x97 | 0x99 => 1000,
        0x86 | 0x87 | 0x96 => 556,
        0x8A => 667,
        0x8C => 1000,
        0x8E | 0x9E => 611,
        0x95 => 350,
        0x9A => 500,
        0x9C => 944,
        0x9F => 667,
        0xA0 | 0xB7 => 278,
        0xA1 | 0xA8 | 0xAD | 0xAF | 0xB2 | 0xB3 | 0xB4 | 0xB8 | 0xB9 => 333,
        0xA2..=0xA5 | 0xA7 | 0xB5 => 556,
        0xA6 => 260,
        0xA9 | 0xAE => 737,
        0xAA => 370,
        0xAB | 0xBB => 556,
        0xAC | 0xB1 | 0xD7 | 0xF7 => 584,
        0xB0 => 400,
        0xB6 => 537,
        0xBA => 365,
        0xBC..=0xBE => 834,
        0xBF => 611,
        0xC0..=0xC5 | 0xC8..=0xCB | 0xDD | 0xDE => 667,
        0xC6 => 1000,
        0xC7 | 0xD0 | 0xD1 | 0xD9..=0xDC => 722,
        0xCC..=0xCF => 278,
        0xD2..=0xD6 | 0xD8 => 778,
        0xDF | 0xF8 => 611,
        0xE0..=0xE5 | 0xE8..=0xEB | 0xF0 | 0xF1 | 0xF2..=0xF6 | 0xF9..=0xFC | 0xFE => 556,
        0xE6 => 889,
        0xE7 | 0xFD | 0xFF => 500,
        0xEC..=0xEF => 278,
        _ => 556,
    }
}

/// Natural rendered width of WinAnsi-encoded text at `font_size` points.
pub fn string_width(encoded: &[u8], font_size: f64) -> f64 {
    let units: u64 = encoded.iter().map(|&b| helvetica_width_units(b) as u64).sum();
    units as f64 / 1000.0 * font_size
}

/// Horizontal scale (`Tz` percentage) stretching `encoded` to `target_width`.
///
/// Degenerate inputs (empty string, zero natural width) keep the neutral
/// scale of 100 so the operator stream stays valid.
pub fn horizontal_scale(encoded: &[u8], font_size: f64, target_width: f64) -> f64 {
    let natural = string_width(encoded, font_size);
    if natural <= f64::EPSILON {
        100.0
    } else {
        100.0 * target_width / natural
    }
}

fn real(v: f64) -> Object {
    Object::Real(v as f32)
}

/// Build a one-page document of the given point size around `content`.
fn single_page_document(width_pt: f64, height_pt: f64, content: Content, with_font: bool) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut resources = lopdf::Dictionary::new();
    if with_font {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        resources.set(
            "Font",
            dictionary! {
                "F1" => font_id,
            },
        );
    }

    let encoded = content.encode().unwrap_or_default();
    let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![real(0.0), real(0.0), real(width_pt), real(height_pt)],
        "Contents" => content_id,
        "Resources" => Object::Dictionary(resources),
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1i64,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

/// Synthesize the invisible-text page for one page's recognition geometry.
pub fn synthesize_text_page(geo: &RecognitionGeometry, dpi: u32, debug_boxes: bool) -> Document {
    let page_w = pt_from_px(geo.page.width(), dpi);
    let page_h = pt_from_px(geo.page.height(), dpi);

    let mut ops: Vec<Operation> = Vec::new();

    if debug_boxes {
        // Paragraph boxes: filled cyan, no outline.
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("rg", vec![real(0.0), real(1.0), real(1.0)]));
        for par in &geo.paragraphs {
            let x = pt_from_px(par.x1, dpi);
            let y = page_h - pt_from_px(par.y2, dpi);
            let w = pt_from_px(par.width(), dpi);
            let h = pt_from_px(par.height(), dpi);
            ops.push(Operation::new("re", vec![real(x), real(y), real(w), real(h)]));
            ops.push(Operation::new("f", vec![]));
        }
        ops.push(Operation::new("Q", vec![]));
    }

    for span in geo.spans() {
        let text = replace_unsupported_chars(span.text.trim());
        if text.is_empty() {
            continue;
        }
        let encoded = encode_win_ansi(&text);

        let x = pt_from_px(span.bbox.x1, dpi);
        let y = page_h - pt_from_px(span.bbox.y2, dpi);
        let box_w = pt_from_px(span.bbox.width(), dpi);
        let font_size = pt_from_px(span.bbox.height(), dpi);
        let scale = horizontal_scale(&encoded, font_size, box_w);

        if debug_boxes {
            ops.push(Operation::new("q", vec![]));
            ops.push(Operation::new("RG", vec![real(1.0), real(0.0), real(0.0)]));
            ops.push(Operation::new("w", vec![real(0.5)]));
            ops.push(Operation::new(
                "d",
                vec![
                    Object::Array(vec![Object::Integer(6), Object::Integer(3)]),
                    Object::Integer(0),
                ],
            ));
            ops.push(Operation::new(
                "re",
                vec![
                    real(x),
                    real(y),
                    real(box_w),
                    real(pt_from_px(span.bbox.height(), dpi)),
                ],
            ));
            ops.push(Operation::new("S", vec![]));
            ops.push(Operation::new("Q", vec![]));
        }

        ops.push(Operation::new("BT", vec![]));
        if !debug_boxes {
            // Render mode 3: glyphs are positioned and searchable but never painted.
            ops.push(Operation::new("Tr", vec![Object::Integer(3)]));
        }
        ops.push(Operation::new("Tf", vec!["F1".into(), real(font_size)]));
        ops.push(Operation::new("Td", vec![real(x), real(y)]));
        ops.push(Operation::new("Tz", vec![real(scale)]));
        ops.push(Operation::new(
            "Tj",
            vec![Object::String(encoded, StringFormat::Literal)],
        ));
        ops.push(Operation::new("ET", vec![]));
    }

    single_page_document(page_w, page_h, Content { operations: ops }, true)
}

/// Synthesize a textless page whose point size matches a raster page of
/// `width_px × height_px` at `dpi`. Used for blank pages and as the slot
/// filler when OCR fails on a page.
pub fn blank_page(width_px: u32, height_px: u32, dpi: u32) -> Document {
    let w = pt_from_px(width_px, dpi);
    let h = pt_from_px(height_px, dpi);
    single_page_document(w, h, Content { operations: vec![] }, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hocr;

    fn page_media_box(doc: &Document) -> (f64, f64) {
        let (_, page_id) = doc.get_pages().into_iter().next().unwrap();
        let page = doc.get_dictionary(page_id).unwrap();
        let mb = page.get(b"MediaBox").unwrap().as_array().unwrap();
        let get = |i: usize| match &mb[i] {
            Object::Real(v) => *v as f64,
            Object::Integer(v) => *v as f64,
            _ => panic!("bad MediaBox entry"),
        };
        (get(2) - get(0), get(3) - get(1))
    }

    fn decoded_ops(doc: &Document) -> Vec<Operation> {
        let (_, page_id) = doc.get_pages().into_iter().next().unwrap();
        let data = doc.get_page_content(page_id).unwrap();
        Content::decode(&data).unwrap().operations
    }

    #[test]
    fn ligatures_expand_to_ascii() {
        assert_eq!(replace_unsupported_chars("ﬁnal ﬂow"), "final flow");
    }

    #[test]
    fn win_ansi_covers_ascii_and_specials() {
        assert_eq!(encode_win_ansi_char('A'), Some(0x41));
        assert_eq!(encode_win_ansi_char('é'), Some(0xE9));
        assert_eq!(encode_win_ansi_char('€'), Some(0x80));
        assert_eq!(encode_win_ansi_char('—'), Some(0x97));
        assert_eq!(encode_win_ansi_char('語'), None);
        assert_eq!(encode_win_ansi("ab語"), vec![b'a', b'b', b'?']);
    }

    #[test]
    fn width_of_known_string() {
        // "Hi" in Helvetica: H=722, i=222 → 0.944 em at 10pt = 9.44pt.
        let w = string_width(b"Hi", 10.0);
        assert!((w - 9.44).abs() < 1e-9, "got {w}");
    }

    #[test]
    fn scale_stretches_to_target_width() {
        let encoded = encode_win_ansi("Hi");
        let scale = horizontal_scale(&encoded, 10.0, 18.88);
        assert!((scale - 200.0).abs() < 1e-6, "got {scale}");
        // Degenerate input keeps neutral scale.
        assert_eq!(horizontal_scale(&[], 10.0, 50.0), 100.0);
    }

    #[test]
    fn blank_page_has_exact_point_size_and_no_content() {
        // 1650×2200 px at 200 dpi = 594×792 pt.
        let doc = blank_page(1650, 2200, 200);
        let (w, h) = page_media_box(&doc);
        assert!((w - 594.0).abs() < 0.01);
        assert!((h - 792.0).abs() < 0.01);
        assert!(decoded_ops(&doc).is_empty());
    }

    #[test]
    fn synthesized_page_matches_geometry_round_trip() {
        let input = r#"<html><body>
          <div class="ocr_page" title="bbox 0 0 2550 3300">
            <span class="ocrx_word" title="bbox 300 300 700 400">Hello</span>
          </div></body></html>"#;
        let geo = hocr::parse(input).unwrap();
        let doc = synthesize_text_page(&geo, 300, false);

        // Page: 2550×3300 px at 300 dpi = 612×792 pt.
        let (w, h) = page_media_box(&doc);
        assert!((w - 612.0).abs() < 0.01);
        assert!((h - 792.0).abs() < 0.01);

        let ops = decoded_ops(&doc);

        // Invisible render mode is set.
        let tr = ops.iter().find(|op| op.operator == "Tr").unwrap();
        assert_eq!(tr.operands[0], Object::Integer(3));

        // Font size equals the bbox point height: 100 px at 300 dpi = 24 pt.
        let tf = ops.iter().find(|op| op.operator == "Tf").unwrap();
        match &tf.operands[1] {
            Object::Real(size) => assert!((*size as f64 - 24.0).abs() < 0.01),
            _ => panic!("Tf size operand missing"),
        }

        // Origin is the bottom-left corner of the flipped bbox.
        let td = ops.iter().find(|op| op.operator == "Td").unwrap();
        match (&td.operands[0], &td.operands[1]) {
            (Object::Real(x), Object::Real(y)) => {
                let (x, y) = (*x as f64, *y as f64);
                assert!((x - 72.0).abs() < 0.01, "x was {x}");
                assert!((y - (792.0 - 96.0)).abs() < 0.01, "y was {y}");
            }
            _ => panic!("Td operands missing"),
        }

        // Tz stretches "Hello" to the 400 px (= 96 pt) box width.
        let tz = ops.iter().find(|op| op.operator == "Tz").unwrap();
        let encoded = encode_win_ansi("Hello");
        let expected = 100.0 * 96.0 / string_width(&encoded, 24.0);
        match &tz.operands[0] {
            Object::Real(scale) => assert!(
                (*scale as f64 - expected).abs() < 0.05,
                "scale {scale} vs expected {expected}"
            ),
            _ => panic!("Tz operand missing"),
        }

        // The shown string is the WinAnsi encoding of the span text.
        let tj = ops.iter().find(|op| op.operator == "Tj").unwrap();
        assert_eq!(tj.operands[0], Object::String(encoded, StringFormat::Literal));
    }

    #[test]
    fn debug_mode_draws_boxes_instead_of_hiding_text() {
        let input = r#"<html><body>
          <div class="ocr_page" title="bbox 0 0 1000 1000">
            <p class="ocr_par" title="bbox 10 10 500 100">
              <span class="ocrx_word" title="bbox 10 10 200 50">word</span>
            </p>
          </div></body></html>"#;
        let geo = hocr::parse(input).unwrap();
        let doc = synthesize_text_page(&geo, 300, true);
        let ops = decoded_ops(&doc);

        assert!(ops.iter().any(|op| op.operator == "re"));
        assert!(ops.iter().any(|op| op.operator == "d"));
        assert!(!ops.iter().any(|op| op.operator == "Tr"));
    }

    #[test]
    fn spans_with_no_text_produce_no_operators() {
        let input = r#"<html><body>
          <div class="ocr_page" title="bbox 0 0 1000 1000">
          </div></body></html>"#;
        let geo = hocr::parse(input).unwrap();
        let doc = synthesize_text_page(&geo, 300, false);
        assert!(decoded_ops(&doc).is_empty());
    }
}
