//! facematch-core — Face detection, recognition and gallery matching.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod gallery;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzerError, FaceAnalyzer, ModelPaths, OnnxAnalyzer};
pub use gallery::{Gallery, GalleryError, SkippedReference};
pub use matcher::{Matcher, Metric, ThresholdMatcher};
pub use pipeline::{decode_image, match_faces, open_image, process_image};
pub use types::{BoundingBox, DetectedFace, Embedding, MatchResult, ReferenceEntry, UNKNOWN_NAME};

/// `$XDG_DATA_HOME/facematch/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch")
        .join("models")
}
