//! PDF document surgery on lopdf objects.
//!
//! Everything the pipeline does to PDFs *without* an external tool lives
//! here: concatenating per-page PDFs in page order, stripping embedded
//! rasters out of engine-produced pages, reading page geometry for the merge
//! decision, compositing two documents page-by-page when no structural merge
//! tool is available, applying rotation records, and rewriting metadata.
//!
//! Pages pulled out of foreign documents may inherit `Resources`/`MediaBox`
//! from their page-tree ancestors, so every reader here walks the `Parent`
//! chain instead of trusting the page dictionary alone.

use crate::error::OcrSandwichError;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Producer signature appended to rewritten metadata.
pub const PRODUCER_SIGNATURE: &str =
    concat!("ocr-sandwich ", env!("CARGO_PKG_VERSION"));

/// Load a PDF, mapping parse failures onto the pipeline error type.
pub fn load(path: &Path) -> Result<Document, OcrSandwichError> {
    Document::load(path).map_err(|e| OcrSandwichError::PdfObject {
        detail: format!("{}: {e}", path.display()),
    })
}

/// Save a document, mapping failures onto the pipeline error type.
pub fn save(doc: &mut Document, path: &Path) -> Result<(), OcrSandwichError> {
    doc.save(path)
        .map(|_| ())
        .map_err(|e| OcrSandwichError::PdfObject {
            detail: format!("could not write {}: {e}", path.display()),
        })
}

/// Number of pages in a PDF file.
pub fn page_count(path: &Path) -> Result<usize, OcrSandwichError> {
    Ok(load(path)?.get_pages().len())
}

fn to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(v) => Some(*v as f64),
        Object::Real(v) => Some(*v as f64),
        _ => None,
    }
}

/// Look up `key` on a page dictionary, walking the `Parent` chain for
/// inheritable attributes.
fn inherited_attr<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = page_id;
    for _ in 0..32 {
        let dict = doc.get_dictionary(current).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => current = *parent,
            _ => return None,
        }
    }
    None
}

/// The page's media box as `[x1, y1, x2, y2]`, resolving inheritance.
pub fn media_box(doc: &Document, page_id: ObjectId) -> Option<[f64; 4]> {
    let obj = inherited_attr(doc, page_id, b"MediaBox")?;
    let arr = match obj {
        Object::Array(a) => a,
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::Array(a) => a,
            _ => return None,
        },
        _ => return None,
    };
    if arr.len() != 4 {
        return None;
    }
    Some([
        to_f64(&arr[0])?,
        to_f64(&arr[1])?,
        to_f64(&arr[2])?,
        to_f64(&arr[3])?,
    ])
}

/// Width × height of the first page, the quantity the merge direction is
/// decided on.
pub fn first_page_area(path: &Path) -> Result<f64, OcrSandwichError> {
    let doc = load(path)?;
    let (_, page_id) = doc
        .get_pages()
        .into_iter()
        .next()
        .ok_or_else(|| OcrSandwichError::PdfObject {
            detail: format!("{} has no pages", path.display()),
        })?;
    let mb = media_box(&doc, page_id).ok_or_else(|| OcrSandwichError::PdfObject {
        detail: format!("{} first page has no media box", path.display()),
    })?;
    Ok((mb[2] - mb[0]).abs() * (mb[3] - mb[1]).abs())
}

/// The page's own resources, or a clone of the inherited ones.
pub(crate) fn resolved_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    match inherited_attr(doc, page_id, b"Resources") {
        Some(Object::Dictionary(d)) => d.clone(),
        Some(Object::Reference(id)) => doc
            .get_dictionary(*id)
            .map(|d| d.clone())
            .unwrap_or_default(),
        _ => Dictionary::new(),
    }
}

// ── Aggregation ──────────────────────────────────────────────────────────

/// Concatenate single-page (or multi-page) PDFs into one document,
/// preserving the given order.
///
/// Inheritable page attributes are pulled down onto each page dictionary
/// before the page is re-parented into the new tree, so nothing is lost
/// when the original ancestors become unreachable.
pub fn concat_documents(paths: &[std::path::PathBuf]) -> Result<Document, OcrSandwichError> {
    let mut merged = Document::with_version("1.5");
    let mut page_ids: Vec<ObjectId> = Vec::new();
    let mut next_id = 1;

    for path in paths {
        let mut doc = load(path)?;
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        for &pid in &pages {
            // Materialize inherited attributes before the old tree goes away.
            for key in [
                b"Resources".as_slice(),
                b"MediaBox".as_slice(),
                b"Rotate".as_slice(),
                b"CropBox".as_slice(),
            ] {
                let has_own = doc
                    .get_dictionary(pid)
                    .map(|d| d.has(key))
                    .unwrap_or(false);
                if !has_own {
                    if let Some(value) = inherited_attr(&doc, pid, key).cloned() {
                        if let Ok(dict) = doc.get_dictionary_mut(pid) {
                            dict.set(key, value);
                        }
                    }
                }
            }
        }

        page_ids.extend(pages.iter().copied());
        merged.objects.extend(std::mem::take(&mut doc.objects));
    }

    if page_ids.is_empty() {
        return Err(OcrSandwichError::PdfObject {
            detail: "no pages found while concatenating".into(),
        });
    }

    merged.max_id = next_id - 1;
    let pages_id = merged.new_object_id();
    for &pid in &page_ids {
        if let Ok(dict) = merged.get_dictionary_mut(pid) {
            dict.set("Parent", pages_id);
        }
    }

    let kids: Vec<Object> = page_ids.iter().map(|&id| Object::Reference(id)).collect();
    let count = page_ids.len() as i64;
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);
    debug!("concatenated {} pages from {} files", count, paths.len());
    Ok(merged)
}

// ── Direct-strategy image stripping ──────────────────────────────────────

/// Remove embedded raster references from an engine-produced text PDF.
///
/// When the OCR engine cannot emit text-only pages it embeds its own copy of
/// the page raster, doubling the artifact size for an image the pipeline
/// already owns. Emptying the `/XObject` resource entry and dropping the
/// `Do` paint operators leaves only the text.
pub fn strip_embedded_images(path: &Path) -> Result<(), OcrSandwichError> {
    let mut doc = load(path)?;
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();

    for pid in pages {
        // Rewrite content without image paints.
        let content = doc.get_page_content(pid)?;
        let decoded = Content::decode(&content)?;
        let kept: Vec<Operation> = decoded
            .operations
            .into_iter()
            .filter(|op| op.operator != "Do")
            .collect();
        let encoded = Content { operations: kept }.encode()?;
        let new_content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        // Empty the XObject table.
        let resources = {
            let page = doc.get_dictionary(pid)?;
            page.get(b"Resources").cloned().ok()
        };
        match resources {
            Some(Object::Reference(rid)) => {
                if let Ok(res) = doc.get_dictionary_mut(rid) {
                    res.set("XObject", Dictionary::new());
                }
            }
            Some(Object::Dictionary(mut res)) => {
                res.set("XObject", Dictionary::new());
                doc.get_dictionary_mut(pid)?
                    .set("Resources", Object::Dictionary(res));
            }
            _ => {}
        }

        doc.get_dictionary_mut(pid)?.set("Contents", new_content_id);
    }

    save(&mut doc, path)
}

// ── Built-in page compositor ─────────────────────────────────────────────

/// Composite `secondary` onto every page of `primary`, page by page, by
/// importing each secondary page as a Form XObject.
///
/// `secondary_on_top` controls paint order: `true` draws the secondary
/// content after the existing page content (overlay), `false` before it
/// (underlay). Extra primary pages pass through untouched; extra secondary
/// pages are ignored with a warning.
pub fn composite(
    primary: &Path,
    secondary: &Path,
    out: &Path,
    secondary_on_top: bool,
) -> Result<(), OcrSandwichError> {
    let mut doc = load(primary)?;
    let mut other = load(secondary)?;
    other.renumber_objects_with(doc.max_id + 1);

    // Capture everything needed from the secondary pages while its own page
    // tree is still reachable.
    struct ImportedPage {
        content: Vec<u8>,
        resources: Dictionary,
        bbox: [f64; 4],
    }
    let mut imported: Vec<ImportedPage> = Vec::new();
    for (_, pid) in other.get_pages() {
        let content = other.get_page_content(pid)?;
        let resources = resolved_resources(&other, pid);
        let bbox = media_box(&other, pid).unwrap_or([0.0, 0.0, 612.0, 792.0]);
        imported.push(ImportedPage {
            content,
            resources,
            bbox,
        });
    }

    doc.max_id = other.max_id;
    doc.objects.extend(std::mem::take(&mut other.objects));

    let primary_pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if imported.len() > primary_pages.len() {
        warn!(
            "composite: secondary has {} pages but primary only {}; extras ignored",
            imported.len(),
            primary_pages.len()
        );
    }

    for (i, &pid) in primary_pages.iter().enumerate() {
        let Some(page) = imported.get(i) else { break };

        let form_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![
                    Object::Real(page.bbox[0] as f32),
                    Object::Real(page.bbox[1] as f32),
                    Object::Real(page.bbox[2] as f32),
                    Object::Real(page.bbox[3] as f32),
                ],
                "Resources" => Object::Dictionary(page.resources.clone()),
            },
            page.content.clone(),
        ));

        let name = format!("OcrSx{i}");
        add_page_xobject(&mut doc, pid, &name, form_id)?;

        let paint = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("Do", vec![name.as_str().into()]),
                Operation::new("Q", vec![]),
            ],
        }
        .encode()?;

        let existing = doc.get_page_content(pid)?;
        // Isolate the original content's graphics state so the imported
        // form always starts from a clean slate.
        let mut wrapped = Vec::with_capacity(existing.len() + 8);
        wrapped.extend_from_slice(b"q\n");
        wrapped.extend_from_slice(&existing);
        wrapped.extend_from_slice(b"\nQ\n");

        let combined = if secondary_on_top {
            [wrapped, paint].concat()
        } else {
            [paint, wrapped].concat()
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, combined));
        doc.get_dictionary_mut(pid)?.set("Contents", content_id);
    }

    save(&mut doc, out)
}

/// Register a Form XObject under `name` in the page's resource dictionary,
/// materializing inherited resources onto the page when necessary.
fn add_page_xobject(
    doc: &mut Document,
    page_id: ObjectId,
    name: &str,
    xobject_id: ObjectId,
) -> Result<(), OcrSandwichError> {
    let resources = {
        let page = doc.get_dictionary(page_id)?;
        page.get(b"Resources").cloned().ok()
    };

    match resources {
        Some(Object::Reference(rid)) => {
            set_xobject_entry(doc, rid, name, xobject_id)?;
        }
        Some(Object::Dictionary(mut res)) => {
            insert_xobject(doc, &mut res, name, xobject_id)?;
            doc.get_dictionary_mut(page_id)?
                .set("Resources", Object::Dictionary(res));
        }
        _ => {
            let mut res = resolved_resources(doc, page_id);
            insert_xobject(doc, &mut res, name, xobject_id)?;
            doc.get_dictionary_mut(page_id)?
                .set("Resources", Object::Dictionary(res));
        }
    }
    Ok(())
}

fn set_xobject_entry(
    doc: &mut Document,
    resources_id: ObjectId,
    name: &str,
    xobject_id: ObjectId,
) -> Result<(), OcrSandwichError> {
    let xobject = {
        let res = doc.get_dictionary(resources_id)?;
        res.get(b"XObject").cloned().ok()
    };
    match xobject {
        Some(Object::Reference(xid)) => {
            doc.get_dictionary_mut(xid)?.set(name, xobject_id);
        }
        Some(Object::Dictionary(mut x)) => {
            x.set(name, xobject_id);
            doc.get_dictionary_mut(resources_id)?
                .set("XObject", Object::Dictionary(x));
        }
        _ => {
            let mut x = Dictionary::new();
            x.set(name, xobject_id);
            doc.get_dictionary_mut(resources_id)?
                .set("XObject", Object::Dictionary(x));
        }
    }
    Ok(())
}

fn insert_xobject(
    doc: &mut Document,
    resources: &mut Dictionary,
    name: &str,
    xobject_id: ObjectId,
) -> Result<(), OcrSandwichError> {
    let existing = resources.get(b"XObject").cloned().ok();
    match existing {
        Some(Object::Reference(xid)) => {
            doc.get_dictionary_mut(xid)?.set(name, xobject_id);
        }
        Some(Object::Dictionary(mut x)) => {
            x.set(name, xobject_id);
            resources.set("XObject", Object::Dictionary(x));
        }
        _ => {
            let mut x = Dictionary::new();
            x.set(name, xobject_id);
            resources.set("XObject", Object::Dictionary(x));
        }
    }
    Ok(())
}

// ── Rotation ─────────────────────────────────────────────────────────────

/// Normalize a rotation to the PDF-legal `{0, 90, 180, 270}` domain.
pub fn normalize_rotation(angle: i64) -> i64 {
    ((angle % 360) + 360) % 360
}

/// Apply one rotation angle per page, in page order, writing to `dest`.
///
/// `angles` must have exactly one entry per page; the orchestrator skips
/// rotation entirely when that invariant cannot be met.
pub fn apply_rotations(
    source: &Path,
    dest: &Path,
    angles: &[i64],
) -> Result<(), OcrSandwichError> {
    let mut doc = load(source)?;
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if pages.len() != angles.len() {
        return Err(OcrSandwichError::Internal(format!(
            "rotation records ({}) do not match page count ({})",
            angles.len(),
            pages.len()
        )));
    }

    for (pid, &angle) in pages.iter().zip(angles) {
        if angle == 0 {
            continue;
        }
        let existing = inherited_attr(&doc, *pid, b"Rotate")
            .and_then(to_f64)
            .unwrap_or(0.0) as i64;
        let rotation = normalize_rotation(existing + angle);
        doc.get_dictionary_mut(*pid)?.set("Rotate", rotation);
    }
    save(&mut doc, dest)
}

// ── Metadata ─────────────────────────────────────────────────────────────

/// Append our signature to an existing Producer value, filtering out bytes
/// that are not printable ASCII first (scanner firmware loves writing
/// garbage into this field).
pub fn producer_with_signature(existing: Option<&[u8]>) -> String {
    match existing {
        Some(bytes) => {
            let printable: String = bytes
                .iter()
                .filter(|b| b.is_ascii() && !b.is_ascii_control())
                .map(|&b| b as char)
                .collect();
            format!("{printable}; {PRODUCER_SIGNATURE}")
        }
        None => PRODUCER_SIGNATURE.to_string(),
    }
}

/// Rewrite `source` to `dest` with a fresh Info dictionary: the captured
/// input metadata plus our Producer signature. Values that are not valid
/// UTF-8 (other than Producer, which gets filtered) are dropped with a
/// warning rather than failing the document.
pub fn edit_metadata(
    source: &Path,
    dest: &Path,
    metadata: &BTreeMap<String, Vec<u8>>,
) -> Result<(), OcrSandwichError> {
    let mut doc = load(source)?;
    let mut info = Dictionary::new();
    let mut producer_seen = false;

    for (key, value) in metadata {
        if key == "Producer" {
            producer_seen = true;
            info.set(
                key.as_bytes().to_vec(),
                Object::String(
                    producer_with_signature(Some(value)).into_bytes(),
                    StringFormat::Literal,
                ),
            );
            continue;
        }
        match std::str::from_utf8(value) {
            Ok(_) => {
                info.set(
                    key.as_bytes().to_vec(),
                    Object::String(value.clone(), StringFormat::Literal),
                );
            }
            Err(_) => warn!("metadata property /{key} not copied to final PDF"),
        }
    }

    if !producer_seen {
        info.set(
            "Producer",
            Object::String(
                producer_with_signature(None).into_bytes(),
                StringFormat::Literal,
            ),
        );
    }

    let info_id = doc.add_object(Object::Dictionary(info));
    doc.trailer.set("Info", info_id);
    save(&mut doc, dest)
}
