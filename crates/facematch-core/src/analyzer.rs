//! Detection + embedding behind one seam.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Finds faces in an image and embeds each of them.
pub trait FaceAnalyzer {
    /// Faces in descending detector confidence; empty when there are none.
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError>;

    /// Highest-confidence face only.
    fn analyze_primary(&mut self, image: &RgbImage) -> Result<Option<DetectedFace>, AnalyzerError> {
        Ok(self.analyze(image)?.into_iter().next())
    }
}

impl<T: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<T> {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        (**self).analyze(image)
    }

    fn analyze_primary(&mut self, image: &RgbImage) -> Result<Option<DetectedFace>, AnalyzerError> {
        (**self).analyze_primary(image)
    }
}

/// Locations of the two ONNX models.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(SCRFD_MODEL_FILE),
            recognizer: dir.join(ARCFACE_MODEL_FILE),
        }
    }
}

/// SCRFD detection followed by ArcFace embedding.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    /// Load both models, failing fast if either is missing.
    pub fn load(paths: &ModelPaths, intra_threads: usize) -> Result<Self, AnalyzerError> {
        let detector_path = paths.detector.to_string_lossy();
        let detector = FaceDetector::load(&detector_path, intra_threads)?;
        tracing::info!(path = %detector_path, "SCRFD detector loaded");

        let recognizer_path = paths.recognizer.to_string_lossy();
        let recognizer = FaceRecognizer::load(&recognizer_path, intra_threads)?;
        tracing::info!(path = %recognizer_path, "ArcFace recognizer loaded");

        Ok(Self::new(detector, recognizer))
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let boxes = self.detector.detect(image)?;
        boxes
            .into_iter()
            .map(|bbox| -> Result<DetectedFace, AnalyzerError> {
                let embedding = self.recognizer.extract(image, &bbox)?;
                Ok(DetectedFace { bbox, embedding })
            })
            .collect()
    }

    /// Embeds only the first detection, so group photos cost one ArcFace run.
    fn analyze_primary(&mut self, image: &RgbImage) -> Result<Option<DetectedFace>, AnalyzerError> {
        let Some(bbox) = self.detector.detect(image)?.into_iter().next() else {
            return Ok(None);
        };
        let embedding = self.recognizer.extract(image, &bbox)?;
        Ok(Some(DetectedFace { bbox, embedding }))
    }
}
