//! Probe image → per-face gallery matches.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::gallery::Gallery;
use crate::matcher::Matcher;
use crate::types::MatchResult;
use image::{ImageReader, RgbImage};
use std::path::Path;

/// Decode an uploaded image of any format the `image` crate recognizes.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, AnalyzerError> {
    Ok(image::load_from_memory(bytes)?.into_rgb8())
}

/// Open an image file, choosing the decoder from its content rather than its extension.
pub fn open_image(path: &Path) -> Result<RgbImage, AnalyzerError> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?.into_rgb8())
}

/// Match every face of an already-decoded image against the gallery.
///
/// One result per detected face, in detector confidence order.
pub fn match_faces(
    image: &RgbImage,
    analyzer: &mut dyn FaceAnalyzer,
    matcher: &dyn Matcher,
    gallery: &Gallery,
) -> Result<Vec<MatchResult>, AnalyzerError> {
    let faces = analyzer.analyze(image)?;
    let results = faces
        .iter()
        .map(|face| matcher.compare(&face.embedding, gallery.entries()))
        .collect::<Vec<_>>();

    tracing::debug!(
        faces = faces.len(),
        matched = results.iter().filter(|r| r.matched).count(),
        "probe image matched"
    );
    Ok(results)
}

/// Decode raw bytes and match every face they contain.
pub fn process_image(
    bytes: &[u8],
    analyzer: &mut dyn FaceAnalyzer,
    matcher: &dyn Matcher,
    gallery: &Gallery,
) -> Result<Vec<MatchResult>, AnalyzerError> {
    let image = decode_image(bytes)?;
    match_faces(&image, analyzer, matcher, gallery)
}
