//! Reference gallery: labelled embeddings loaded once from a directory.

use crate::analyzer::FaceAnalyzer;
use crate::pipeline::open_image;
use crate::types::{Embedding, ReferenceEntry};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions accepted as reference images (compared case-insensitively).
pub const REFERENCE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read reference directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A reference image that did not produce an entry.
#[derive(Debug, Clone)]
pub struct SkippedReference {
    pub name: String,
    pub reason: String,
}

/// Immutable, ordered set of reference entries.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<ReferenceEntry>,
    skipped: Vec<SkippedReference>,
}

impl Gallery {
    pub fn from_entries(entries: Vec<ReferenceEntry>) -> Self {
        Self { entries, skipped: Vec::new() }
    }

    /// Scan `dir` and embed the first face of every reference image.
    ///
    /// Files are visited in name order. Images that fail to decode or
    /// contain no face are logged and recorded in [`Gallery::skipped`].
    pub fn load(dir: &Path, analyzer: &mut dyn FaceAnalyzer) -> Result<Self, GalleryError> {
        let read_err = |source| GalleryError::ReadDir { path: dir.to_path_buf(), source };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.is_file() && is_reference_image(&path) {
                files.push(path);
            }
        }
        files.sort();

        let mut gallery = Gallery::default();
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match embed_reference(&path, analyzer) {
                Ok(entry_embedding) => {
                    tracing::debug!(name = %name, "reference loaded");
                    gallery.entries.push(ReferenceEntry { name, embedding: entry_embedding });
                }
                Err(reason) => {
                    tracing::warn!(name = %name, %reason, "skipping reference image");
                    gallery.skipped.push(SkippedReference { name, reason });
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            references = gallery.entries.len(),
            skipped = gallery.skipped.len(),
            "reference gallery loaded"
        );
        Ok(gallery)
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn skipped(&self) -> &[SkippedReference] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

fn is_reference_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| REFERENCE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

fn embed_reference(
    path: &Path,
    analyzer: &mut dyn FaceAnalyzer,
) -> Result<Embedding, String> {
    let image = open_image(path).map_err(|e| format!("decode failed: {e}"))?;
    analyzer
        .analyze_primary(&image)
        .map_err(|e| e.to_string())?
        .map(|face| face.embedding)
        .ok_or_else(|| "no face detected".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerError;
    use crate::types::{BoundingBox, DetectedFace};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// Embeds the top-left pixel colour; near-black images have no face.
    struct ColourAnalyzer;

    impl FaceAnalyzer for ColourAnalyzer {
        fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
            let Rgb([r, g, b]) = *image.get_pixel(0, 0);
            if r < 16 && g < 16 && b < 16 {
                return Ok(Vec::new());
            }
            Ok(vec![DetectedFace {
                bbox: BoundingBox {
                    x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 1.0, landmarks: None,
                },
                embedding: Embedding::new(vec![r as f32, g as f32, b as f32]),
            }])
        }
    }

    /// Reports two faces from `analyze`; counts which entry point ran.
    #[derive(Default)]
    struct GroupAnalyzer {
        full_passes: usize,
        primary_passes: usize,
    }

    impl GroupAnalyzer {
        fn face(value: f32) -> DetectedFace {
            DetectedFace {
                bbox: BoundingBox {
                    x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 1.0, landmarks: None,
                },
                embedding: Embedding::new(vec![value]),
            }
        }
    }

    impl FaceAnalyzer for GroupAnalyzer {
        fn analyze(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
            self.full_passes += 1;
            Ok(vec![Self::face(1.0), Self::face(2.0)])
        }

        fn analyze_primary(&mut self, _image: &RgbImage) -> Result<Option<DetectedFace>, AnalyzerError> {
            self.primary_passes += 1;
            Ok(Some(Self::face(1.0)))
        }
    }

    fn write_image(dir: &Path, name: &str, colour: [u8; 3]) {
        RgbImage::from_pixel(8, 8, Rgb(colour)).save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_load_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "bob.png", [0, 200, 0]);
        write_image(dir.path(), "alice.PNG", [200, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let gallery = Gallery::load(dir.path(), &mut ColourAnalyzer).unwrap();
        assert_eq!(gallery.names().collect::<Vec<_>>(), vec!["alice.PNG", "bob.png"]);
        assert!(gallery.skipped().is_empty());
        assert!((gallery.entries()[0].embedding.values[0] - 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_faceless_and_corrupt_references_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "blank.png", [0, 0, 0]);
        write_image(dir.path(), "carol.png", [0, 0, 200]);
        std::fs::write(dir.path().join("broken.jpg"), b"definitely not a jpeg").unwrap();

        let gallery = Gallery::load(dir.path(), &mut ColourAnalyzer).unwrap();
        assert_eq!(gallery.names().collect::<Vec<_>>(), vec!["carol.png"]);

        let skipped: Vec<_> = gallery.skipped().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(skipped, vec!["blank.png", "broken.jpg"]);
        assert_eq!(gallery.skipped()[0].reason, "no face detected");
    }

    #[test]
    fn test_empty_directory_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::load(dir.path(), &mut ColourAnalyzer).unwrap();
        assert!(gallery.is_empty());
        assert_eq!(gallery.len(), 0);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = Gallery::load(&missing, &mut ColourAnalyzer).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_reference_format_detected_from_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut png = Cursor::new(Vec::new());
        RgbImage::from_pixel(8, 8, Rgb([0, 120, 0]))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        std::fs::write(dir.path().join("alice.jpg"), png.into_inner()).unwrap();

        let gallery = Gallery::load(dir.path(), &mut ColourAnalyzer).unwrap();
        assert_eq!(gallery.names().collect::<Vec<_>>(), vec!["alice.jpg"]);
        assert!(gallery.skipped().is_empty());
        assert!((gallery.entries()[0].embedding.values[1] - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_references_embed_only_the_primary_face() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "group.png", [90, 90, 90]);
        write_image(dir.path(), "team.jpg", [90, 90, 90]);

        let mut analyzer = GroupAnalyzer::default();
        let gallery = Gallery::load(dir.path(), &mut analyzer).unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(analyzer.primary_passes, 2);
        assert_eq!(analyzer.full_passes, 0);
        assert!(gallery.entries().iter().all(|e| e.embedding.values == vec![1.0]));
    }

    #[test]
    fn test_default_primary_is_first_face() {
        let image = RgbImage::from_pixel(4, 4, Rgb([200, 10, 10]));
        let face = ColourAnalyzer.analyze_primary(&image).unwrap().unwrap();
        assert!((face.embedding.values[0] - 200.0).abs() < 1e-6);

        let blank = RgbImage::new(4, 4);
        assert!(ColourAnalyzer.analyze_primary(&blank).unwrap().is_none());
    }
}
