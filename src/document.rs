//! Input validation: sniff the source kind and capture its PDF properties.
//!
//! [`SourceDocument`] is immutable after [`SourceDocument::open`] returns —
//! the orchestrator and every worker read from the same validated snapshot
//! instead of re-probing the file mid-run.

use crate::error::OcrSandwichError;
use lopdf::{Document, Object};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What kind of file the caller handed us, decided by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Tiff,
    Jpeg,
    Png,
}

impl InputKind {
    /// Raster inputs cannot be merged directly and force the rebuild path.
    pub fn is_raster(&self) -> bool {
        !matches!(self, InputKind::Pdf)
    }
}

/// A validated input document.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Absolute path to the input file.
    pub path: PathBuf,
    /// Detected file kind.
    pub kind: InputKind,
    /// Input size in bytes.
    pub size_bytes: u64,
    /// Page count; `None` for raster inputs and unparseable encrypted PDFs —
    /// defined later by the number of rasterized pages.
    pub page_count: Option<usize>,
    /// Whether the PDF carries an `/Encrypt` dictionary.
    pub encrypted: bool,
    /// Whether any page resources reference a font (a font means text).
    pub has_text: bool,
    /// Info-dictionary entries whose values were PDF strings. Non-string
    /// values (arrays etc.) are dropped here with a warning, matching the
    /// only representation the metadata editor can write back.
    pub metadata: BTreeMap<String, Vec<u8>>,
}

impl SourceDocument {
    /// Validate `path` and capture everything later stages need to know.
    pub fn open(path: &Path) -> Result<Self, OcrSandwichError> {
        let meta = fs::metadata(path).map_err(|_| OcrSandwichError::InputNotFound {
            path: path.to_path_buf(),
        })?;
        if !meta.is_file() {
            return Err(OcrSandwichError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let path = path
            .canonicalize()
            .map_err(|e| OcrSandwichError::Workspace { source: e })?;
        let kind = sniff_kind(&path)?;
        debug!("input {} detected as {:?}", path.display(), kind);

        let mut doc = SourceDocument {
            path: path.clone(),
            kind,
            size_bytes: meta.len(),
            page_count: None,
            encrypted: false,
            has_text: false,
            metadata: BTreeMap::new(),
        };

        if kind == InputKind::Pdf {
            doc.inspect_pdf()?;
        }
        Ok(doc)
    }

    /// Read page count, encryption flag, text presence and metadata with lopdf.
    fn inspect_pdf(&mut self) -> Result<(), OcrSandwichError> {
        let parsed = match Document::load(&self.path) {
            Ok(d) => d,
            Err(e) => {
                // lopdf refuses some encrypted files outright. That is not
                // fatal: the rebuild path works from rasters alone and the
                // page count gets defined by the rasterizer output.
                if looks_encrypted(&self.path) {
                    warn!(
                        "could not parse encrypted PDF {}; page count unknown until rasterized",
                        self.path.display()
                    );
                    self.encrypted = true;
                    return Ok(());
                }
                return Err(OcrSandwichError::CorruptPdf {
                    path: self.path.clone(),
                    detail: e.to_string(),
                });
            }
        };

        self.encrypted = parsed.trailer.get(b"Encrypt").is_ok();
        let pages = parsed.get_pages();
        if pages.is_empty() {
            warn!("could not read input page count; will use rasterized page count");
        } else {
            self.page_count = Some(pages.len());
        }

        self.has_text = pages_reference_fonts(&parsed);

        // Metadata survives only for unprotected inputs; the rebuild path
        // wipes it anyway and encrypted metadata may be garbage.
        if !self.encrypted {
            self.metadata = read_info_strings(&parsed);
        }
        Ok(())
    }
}

/// Identify the input by its first bytes; no external detector needed.
fn sniff_kind(path: &Path) -> Result<InputKind, OcrSandwichError> {
    let mut magic = [0u8; 4];
    let mut f = fs::File::open(path).map_err(|_| OcrSandwichError::InputNotFound {
        path: path.to_path_buf(),
    })?;
    let n = f
        .read(&mut magic)
        .map_err(|e| OcrSandwichError::Workspace { source: e })?;
    if n < 4 {
        return Err(OcrSandwichError::UnsupportedInput {
            path: path.to_path_buf(),
            magic,
        });
    }
    match magic {
        [b'%', b'P', b'D', b'F'] => Ok(InputKind::Pdf),
        [0xFF, 0xD8, _, _] => Ok(InputKind::Jpeg),
        [0x89, b'P', b'N', b'G'] => Ok(InputKind::Png),
        [b'I', b'I', 0x2A, 0x00] | [b'M', b'M', 0x00, 0x2A] => Ok(InputKind::Tiff),
        _ => Err(OcrSandwichError::UnsupportedInput {
            path: path.to_path_buf(),
            magic,
        }),
    }
}

/// Byte-scan fallback for files lopdf cannot parse at all.
fn looks_encrypted(path: &Path) -> bool {
    fs::read(path)
        .map(|bytes| contains_subslice(&bytes, b"/Encrypt"))
        .unwrap_or(false)
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// A file has text iff some page's resources carry a `/Font` entry.
fn pages_reference_fonts(doc: &Document) -> bool {
    for (_, page_id) in doc.get_pages() {
        let resources = crate::pdfops::resolved_resources(doc, page_id);
        if has_font_entry(doc, &resources) {
            return true;
        }
    }
    false
}

fn has_font_entry(doc: &Document, resources: &lopdf::Dictionary) -> bool {
    match resources.get(b"Font") {
        Ok(Object::Dictionary(d)) => !d.is_empty(),
        Ok(Object::Reference(id)) => doc
            .get_dictionary(*id)
            .map(|d| !d.is_empty())
            .unwrap_or(false),
        _ => false,
    }
}

/// Collect Info entries whose values are PDF strings.
fn read_info_strings(doc: &Document) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    let Ok(info_obj) = doc.trailer.get(b"Info") else {
        return out;
    };
    let info = match info_obj {
        Object::Reference(id) => match doc.get_dictionary(*id) {
            Ok(d) => d,
            Err(_) => return out,
        },
        Object::Dictionary(d) => d,
        _ => return out,
    };
    for (key, value) in info.iter() {
        let name = String::from_utf8_lossy(key).to_string();
        match value {
            Object::String(bytes, _) => {
                out.insert(name, bytes.clone());
            }
            _ => warn!("metadata property /{name} is not a string and will not be copied"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(bytes: &[u8], ext: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(ext).tempfile().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn sniffs_pdf_magic() {
        let f = write_temp(b"%PDF-1.7\n%%EOF", ".pdf");
        assert_eq!(sniff_kind(f.path()).unwrap(), InputKind::Pdf);
    }

    #[test]
    fn sniffs_raster_magics() {
        let jpg = write_temp(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00], ".jpg");
        assert_eq!(sniff_kind(jpg.path()).unwrap(), InputKind::Jpeg);

        let png = write_temp(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A], ".png");
        assert_eq!(sniff_kind(png.path()).unwrap(), InputKind::Png);

        let tiff_le = write_temp(&[b'I', b'I', 0x2A, 0x00, 0x08], ".tif");
        assert_eq!(sniff_kind(tiff_le.path()).unwrap(), InputKind::Tiff);

        let tiff_be = write_temp(&[b'M', b'M', 0x00, 0x2A, 0x00], ".tif");
        assert_eq!(sniff_kind(tiff_be.path()).unwrap(), InputKind::Tiff);
    }

    #[test]
    fn rejects_unknown_magic() {
        let f = write_temp(b"GIF89a...", ".gif");
        assert!(matches!(
            sniff_kind(f.path()),
            Err(OcrSandwichError::UnsupportedInput { .. })
        ));
    }

    #[test]
    fn raster_kinds_force_rebuild() {
        assert!(InputKind::Jpeg.is_raster());
        assert!(InputKind::Tiff.is_raster());
        assert!(InputKind::Png.is_raster());
        assert!(!InputKind::Pdf.is_raster());
    }

    #[test]
    fn missing_file_is_input_not_found() {
        let err = SourceDocument::open(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, OcrSandwichError::InputNotFound { .. }));
    }

    #[test]
    fn subslice_search() {
        assert!(contains_subslice(b"xx/Encrypt 12", b"/Encrypt"));
        assert!(!contains_subslice(b"no such key", b"/Encrypt"));
    }
}
