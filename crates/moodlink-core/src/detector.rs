//! SCRFD face locator via ONNX Runtime.
//!
//! Letterboxes the grayscale frame into the square model input, decodes the
//! three anchor-free stride heads into boxes and suppresses overlaps. Landmark
//! heads are ignored: the classifier only needs the face rectangle.

use crate::frame::Frame;
use crate::types::{FaceLocator, Region};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
const NMS_IOU: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected model layout: {0}")]
    Layout(String),
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Where the frame landed inside the letterboxed input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let (w, h) = Self::scaled_dims(width, height, scale);
        Self {
            scale,
            pad_x: (INPUT_SIZE - w) / 2,
            pad_y: (INPUT_SIZE - h) / 2,
        }
    }

    fn scaled_dims(width: u32, height: u32, scale: f32) -> (u32, u32) {
        let w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        (w, h)
    }

    /// Map a point from model input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Decoded box in frame coordinates, before clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let iw = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let ih = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }

    fn to_region(self, frame_width: u32, frame_height: u32) -> Option<Region> {
        let x1 = self.x1.max(0.0).round() as u32;
        let y1 = self.y1.max(0.0).round() as u32;
        let x2 = self.x2.max(0.0).round() as u32;
        let y2 = self.y2.max(0.0).round() as u32;
        let region = Region {
            x: x1,
            y: y1,
            width: x2.saturating_sub(x1),
            height: y2.saturating_sub(y1),
            confidence: self.score,
        };
        region.clamp_to(frame_width, frame_height)
    }
}

/// SCRFD-based [`FaceLocator`].
pub struct OnnxFaceLocator {
    session: Session,
    threshold: f32,
    /// Output slots per stride as (score, bbox), in `STRIDES` order.
    heads: [(usize, usize); 3],
}

impl OnnxFaceLocator {
    /// Load an SCRFD ONNX export. Detections scoring at or below `threshold` are dropped.
    pub fn load(model_path: &str, threshold: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::Layout(format!(
                "need score and bbox heads for 3 strides, model has {} outputs",
                names.len()
            )));
        }
        let heads = head_indices(&names);

        tracing::info!(path = model_path, outputs = ?names, ?heads, threshold, "loaded face locator");

        Ok(Self { session, threshold, heads })
    }

    fn input_tensor(frame: &Frame, letterbox: &Letterbox) -> Result<Array4<f32>, DetectorError> {
        let expected = (frame.width * frame.height) as usize;
        let view = ImageBuffer::<Luma<u8>, &[u8]>::from_raw(frame.width, frame.height, &frame.data[..])
            .ok_or(DetectorError::FrameSize { expected, actual: frame.data.len() })?;

        let (w, h) = Letterbox::scaled_dims(frame.width, frame.height, letterbox.scale);
        let resized = imageops::resize(&view, w, h, FilterType::Triangle);

        let side = INPUT_SIZE as usize;
        // Padding is left at 0.0, i.e. the mean pixel after normalization.
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, px) in resized.enumerate_pixels() {
            let v = (px.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
            let (ty, tx) = ((y + letterbox.pad_y) as usize, (x + letterbox.pad_x) as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = v;
            }
        }
        Ok(tensor)
    }
}

impl FaceLocator for OnnxFaceLocator {
    type Error = DetectorError;

    fn locate(&mut self, frame: &Frame) -> Result<Vec<Region>, DetectorError> {
        if frame.width == 0 || frame.height == 0 {
            return Ok(Vec::new());
        }
        let letterbox = Letterbox::fit(frame.width, frame.height);
        let input = Self::input_tensor(frame, &letterbox)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in STRIDES.iter().zip(self.heads.iter()) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            candidates.extend(decode_head(scores, bboxes, stride, self.threshold, &letterbox));
        }

        let regions: Vec<Region> = suppress(candidates)
            .into_iter()
            .filter_map(|c| c.to_region(frame.width, frame.height))
            .collect();
        tracing::trace!(seq = frame.sequence, faces = regions.len(), "located faces");
        Ok(regions)
    }
}

/// Find the (score, bbox) outputs of each stride.
///
/// Exports that name their heads `score_8`, `bbox_8`, ... are mapped by name;
/// anything else uses the standard order `[scores 8/16/32, bboxes 8/16/32, ...]`.
fn head_indices(names: &[String]) -> [(usize, usize); 3] {
    let find = |prefix: &str, stride: usize| names.iter().position(|n| *n == format!("{prefix}_{stride}"));
    let named: Option<Vec<(usize, usize)>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();
    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

/// Decode one stride head into candidates above `threshold`.
fn decode_head(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    threshold: f32,
    letterbox: &Letterbox,
) -> Vec<Candidate> {
    let cells = INPUT_SIZE as usize / stride;
    let anchors = cells * cells * ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % cells) as f32 * step;
            let cy = (cell / cells) as f32 * step;
            let (x1, y1) = letterbox.unmap(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.unmap(cx + d[2] * step, cy + d[3] * step);
            Some(Candidate { x1, y1, x2, y2, score })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest score first.
fn suppress(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if kept.iter().all(|k| k.iou(&c) <= NMS_IOU) {
            kept.push(c);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Candidate {
        Candidate { x1, y1, x2, y2, score }
    }

    #[test]
    fn test_iou() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = cand(5.0, 0.0, 15.0, 10.0, 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&cand(20.0, 20.0, 30.0, 30.0, 1.0)), 0.0);
    }

    #[test]
    fn test_suppress_keeps_best_of_overlapping() {
        let kept = suppress(vec![
            cand(5.0, 5.0, 105.0, 105.0, 0.8),
            cand(0.0, 0.0, 100.0, 100.0, 0.9),
            cand(200.0, 200.0, 250.0, 250.0, 0.7),
        ]);
        let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
        assert_eq!(scores, [0.9, 0.7]);
    }

    #[test]
    fn test_letterbox_qvga() {
        let lb = Letterbox::fit(320, 240);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!((lb.pad_x, lb.pad_y), (0, 80));
        let (x, y) = lb.unmap(200.0, 180.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_head_single_anchor() {
        let stride = 32;
        let cells = INPUT_SIZE as usize / stride;
        let anchors = cells * cells * ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        let mut bboxes = vec![0.0; anchors * 4];

        // Anchor in cell (row 3, col 2): centre (64, 96) in input space.
        let idx = (3 * cells + 2) * ANCHORS_PER_CELL;
        scores[idx] = 0.95;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let lb = Letterbox { scale: 1.0, pad_x: 0, pad_y: 0 };
        let found = decode_head(&scores, &bboxes, stride, 0.5, &lb);
        assert_eq!(found, vec![cand(32.0, 64.0, 96.0, 128.0, 0.95)]);
    }

    #[test]
    fn test_decode_head_threshold_and_short_buffers() {
        let lb = Letterbox { scale: 1.0, pad_x: 0, pad_y: 0 };
        assert!(decode_head(&[0.5, 0.4], &[0.0; 8], 32, 0.5, &lb).is_empty());
        // Score present but bbox tensor truncated.
        assert!(decode_head(&[0.9], &[0.0; 2], 32, 0.5, &lb).is_empty());
    }

    #[test]
    fn test_candidate_to_region_clamps() {
        let region = cand(-10.0, 20.0, 50.0, 300.0, 0.8).to_region(320, 240).unwrap();
        assert_eq!((region.x, region.y, region.width, region.height), (0, 20, 50, 220));
        assert!((region.confidence - 0.8).abs() < 1e-6);
        assert!(cand(400.0, 0.0, 420.0, 20.0, 0.9).to_region(320, 240).is_none());
    }

    #[test]
    fn test_head_indices_named() {
        let names: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(head_indices(&names), [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_head_indices_positional() {
        let names: Vec<String> = (0..9).map(|i: usize| (440 + i).to_string()).collect();
        assert_eq!(head_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }
}
