//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the RGB image into the 640×640 network input, decodes the
//! three anchor-free stride heads, and suppresses overlaps with greedy NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_MIN_OUTPUTS: usize = 9;

/// [scores 8/16/32, bboxes 8/16/32, kps 8/16/32]
const POSITIONAL_LAYOUT: [StrideOutputIndices; 3] = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface into the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// Placement of the resized image inside the square network input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: u32,
    offset_y: u32,
    resized_w: u32,
    resized_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let resized_w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let resized_h = ((height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            offset_x: (target - resized_w) / 2,
            offset_y: (target - resized_h) / 2,
            resized_w,
            resized_h,
        }
    }

    /// Network-input coordinates back to source-image coordinates.
    fn unmap(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// Raw head outputs for one stride level.
struct StrideOutput<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

impl StrideOutput<'_> {
    fn decode(&self, input_size: usize, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
        let grid_w = input_size / self.stride;
        let grid_h = input_size / self.stride;
        let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
        let step = self.stride as f32;

        let mut detections = Vec::new();
        for idx in 0..anchors {
            let score = self.scores.get(idx).copied().unwrap_or(0.0);
            if score <= threshold {
                continue;
            }

            let Some(dist) = self.bboxes.get(idx * 4..idx * 4 + 4) else {
                continue;
            };

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * step;
            let ay = (cell / grid_w) as f32 * step;

            let (x1, y1) = letterbox.unmap((ax - dist[0] * step, ay - dist[1] * step));
            let (x2, y2) = letterbox.unmap((ax + dist[2] * step, ay + dist[3] * step));

            let landmarks = self.kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.unmap((ax + k[i * 2] * step, ay + k[i * 2 + 1] * step))
                })
            });

            detections.push(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            });
        }
        detections
    }
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: u32,
    /// Per-stride output indices for strides [8, 16, 32].
    layout: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < SCRFD_MIN_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires {SCRFD_MIN_OUTPUTS} outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let layout = discover_output_indices(&output_names);
        tracing::debug!(?layout, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            layout,
        })
    }

    /// Detect faces in an RGB image, sorted by descending confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let letterbox = Letterbox::fit(image.width(), image.height(), self.input_size);
        let input = preprocess(image, &letterbox, self.input_size);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(self.layout.iter()) {
            let extract = |idx: usize, what: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let head = StrideOutput {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(head.decode(
                self.input_size as usize,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }
}

/// Letterbox an RGB image into a normalized NCHW tensor.
///
/// Padding is left at 0.0, which is the normalized value of `SCRFD_MEAN`.
fn preprocess(image: &RgbImage, letterbox: &Letterbox, input_size: u32) -> Array4<f32> {
    let resized = imageops::resize(image, letterbox.resized_w, letterbox.resized_h, FilterType::Triangle);
    let size = input_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + letterbox.offset_x) as usize;
        let ty = (y + letterbox.offset_y) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    tensor
}

/// Map output tensors to stride slots.
///
/// SCRFD exports name their outputs either `score_8`, `bbox_16`, `kps_32`, ...
/// or with opaque numeric ids; the latter use `POSITIONAL_LAYOUT`.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    match named_layout(names) {
        Some(layout) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            layout
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            POSITIONAL_LAYOUT
        }
    }
}

fn named_layout(names: &[String]) -> Option<[StrideOutputIndices; 3]> {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut layout = POSITIONAL_LAYOUT;
    for (slot, &stride) in layout.iter_mut().zip(SCRFD_STRIDES.iter()) {
        *slot = (find("score", stride)?, find("bbox", stride)?, find("kps", stride)?);
    }
    Some(layout)
}

/// Greedy Non-Maximum Suppression. Output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::with_capacity(detections.len());
    for det in detections {
        if keep.iter().all(|kept| kept.iou(&det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_landscape() {
        let lb = Letterbox::fit(320, 240, 640);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!((lb.resized_w, lb.resized_h), (640, 480));
        assert_eq!((lb.offset_x, lb.offset_y), (0, 80));

        let (x, y) = lb.unmap((100.0 * 2.0, 50.0 * 2.0 + 80.0));
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_padding_and_channels() {
        let image = RgbImage::from_pixel(64, 32, Rgb([255, 127, 0]));
        let lb = Letterbox::fit(64, 32, 640);
        let tensor = preprocess(&image, &lb, 640);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);

        // Padding row above the image
        assert_eq!(tensor[[0, 0, 0, 320]], 0.0);

        let (cx, cy) = (320, 320);
        assert!((tensor[[0, 0, cy, cx]] - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-2);
        assert!((tensor[[0, 1, cy, cx]] - (127.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-2);
        assert!((tensor[[0, 2, cy, cx]] - (0.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-2);
    }

    #[test]
    fn test_decode_single_anchor() {
        let stride = 32;
        let grid = 640 / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];

        // Cell (x=2, y=1), second anchor.
        let idx = (grid + 2) * SCRFD_ANCHORS_PER_CELL + 1;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let head = StrideOutput { stride, scores: &scores, bboxes: &bboxes, kps: &kps };
        let lb = Letterbox::fit(640, 640, 640);
        let dets = head.decode(640, &lb, 0.5);

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 32.0).abs() < 1e-4 && (d.y - 0.0).abs() < 1e-4);
        assert!((d.width - 64.0).abs() < 1e-4 && (d.height - 64.0).abs() < 1e-4);
        let lms = d.landmarks.expect("landmarks decoded");
        assert!((lms[0].0 - 64.0).abs() < 1e-4 && (lms[0].1 - 32.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_skips_low_scores() {
        let scores = vec![0.5f32; 800];
        let head = StrideOutput { stride: 32, scores: &scores, bboxes: &[], kps: &[] };
        assert!(head.decode(640, &Letterbox::fit(640, 640, 640), 0.5).is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (428 + i).to_string()).collect();
        assert_eq!(discover_output_indices(&names), POSITIONAL_LAYOUT);
    }
}
