//! Per-document temporary workspace.
//!
//! Every document run owns exactly one randomly named directory. All
//! intermediate artifacts live there, named with an explicit zero-padded page
//! index so the true page order can always be recovered by parsing the index
//! back out — never by lexical filename comparison alone, which breaks once
//! a tool pads differently for large page counts.
//!
//! The directory is removed when the [`Workspace`] is dropped (including on
//! fatal errors and timeouts, where the orchestrator's future is dropped
//! mid-flight) unless keep-temps was requested, in which case the path is
//! logged and left behind for inspection.

use crate::error::OcrSandwichError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Prefix for raster page images produced by the rasterizer.
pub const RASTER_PREFIX: &str = "page";
/// Extension for raster page images. JPEG keeps the temp footprint small for
/// documents with many pages.
pub const RASTER_EXT: &str = "jpg";
/// Prefix for per-page OCR artifacts (pdf/txt/hocr/osd share the base name).
pub const OCR_PREFIX: &str = "ocr";
/// Prefix for per-page rebuilt PDFs.
pub const REBUILD_PREFIX: &str = "rebuild";

static TRAILING_INDEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)$").unwrap());

/// A uniquely named temporary directory owned by one document run.
#[derive(Debug)]
pub struct Workspace {
    /// Owns the directory lifetime; `None` once deletion is disarmed.
    _guard: Option<TempDir>,
    root: PathBuf,
    keep: bool,
}

impl Workspace {
    /// Create a fresh workspace under the system temp directory.
    ///
    /// With `keep` set, deletion is disarmed immediately: the directory then
    /// survives every exit path, including fatal errors and timeouts where
    /// the owning future is dropped mid-flight.
    pub fn create(keep: bool) -> Result<Self, OcrSandwichError> {
        let dir = tempfile::Builder::new()
            .prefix("ocrsandwich-")
            .tempdir()
            .map_err(|e| OcrSandwichError::Workspace { source: e })?;
        let root = dir.path().to_path_buf();
        info!("workspace is {}", root.display());
        let guard = if keep {
            let kept = dir.keep();
            info!("temporary files will be kept in {}", kept.display());
            None
        } else {
            Some(dir)
        };
        Ok(Self {
            _guard: guard,
            root,
            keep,
        })
    }

    /// The workspace directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a file inside the workspace.
    pub fn file(&self, name: impl AsRef<str>) -> PathBuf {
        self.root.join(name.as_ref())
    }

    /// Base name (no extension) for a page-indexed artifact, zero-padded so
    /// external tools that sort lexically still see the right order.
    pub fn indexed_base(prefix: &str, index: u32) -> String {
        format!("{prefix}-{index:09}")
    }

    /// Path for a page-indexed artifact with the given extension.
    pub fn indexed_file(&self, prefix: &str, index: u32, ext: &str) -> PathBuf {
        self.file(format!("{}.{ext}", Self::indexed_base(prefix, index)))
    }

    /// Collect `prefix-*.ext` artifacts, keyed by the integer page index
    /// parsed from the file stem, sorted by that index.
    ///
    /// The parsed key is what establishes page order; the zero-padding in
    /// the names we generate is only a courtesy for humans and tools.
    pub fn list_indexed(
        &self,
        prefix: &str,
        ext: &str,
    ) -> Result<Vec<(u32, PathBuf)>, OcrSandwichError> {
        let mut found = Vec::new();
        let entries =
            std::fs::read_dir(&self.root).map_err(|e| OcrSandwichError::Workspace { source: e })?;
        for entry in entries {
            let entry = entry.map_err(|e| OcrSandwichError::Workspace { source: e })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !stem.starts_with(prefix) {
                continue;
            }
            if let Some(index) = parse_trailing_index(stem) {
                found.push((index, path));
            }
        }
        found.sort_by_key(|(index, _)| *index);
        Ok(found)
    }

    /// Whether keep-temps is active for this workspace.
    pub fn keeps_temps(&self) -> bool {
        self.keep
    }
}

/// Parse the page index from an artifact file stem (`page-000000012` → 12).
pub fn parse_trailing_index(stem: &str) -> Option<u32> {
    TRAILING_INDEX
        .captures(stem)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_names_are_zero_padded() {
        assert_eq!(Workspace::indexed_base("ocr", 7), "ocr-000000007");
        assert_eq!(Workspace::indexed_base("rebuild", 123456), "rebuild-000123456");
    }

    #[test]
    fn parses_trailing_index_regardless_of_padding() {
        assert_eq!(parse_trailing_index("page-1"), Some(1));
        assert_eq!(parse_trailing_index("page-000000042"), Some(42));
        assert_eq!(parse_trailing_index("page-10-3"), Some(3));
        assert_eq!(parse_trailing_index("page"), None);
    }

    #[test]
    fn list_indexed_orders_numerically_not_lexically() {
        let ws = Workspace::create(false).unwrap();
        // Unpadded names sort wrong lexically: "10" < "2". The integer key
        // must win.
        for n in [10u32, 2, 1, 33] {
            std::fs::write(ws.file(format!("page-{n}.jpg")), b"x").unwrap();
        }
        std::fs::write(ws.file("unrelated.txt"), b"x").unwrap();

        let listed = ws.list_indexed("page", "jpg").unwrap();
        let indices: Vec<u32> = listed.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2, 10, 33]);
    }

    #[test]
    fn list_indexed_filters_by_prefix_and_extension() {
        let ws = Workspace::create(false).unwrap();
        std::fs::write(ws.file("page-1.jpg"), b"x").unwrap();
        std::fs::write(ws.file("rebuild-1.pdf"), b"x").unwrap();
        std::fs::write(ws.file("page-2.pdf"), b"x").unwrap();

        assert_eq!(ws.list_indexed("page", "jpg").unwrap().len(), 1);
        assert_eq!(ws.list_indexed("rebuild", "pdf").unwrap().len(), 1);
    }

    #[test]
    fn workspace_removes_directory_on_drop() {
        let root;
        {
            let ws = Workspace::create(false).unwrap();
            root = ws.root().to_path_buf();
            std::fs::write(ws.file("a.txt"), b"x").unwrap();
            assert!(root.exists());
        }
        assert!(!root.exists());
    }
}
