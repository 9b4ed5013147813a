//! Emotion classifier via ONNX Runtime.
//!
//! Crops the face region out of the grayscale frame, resizes it to the square
//! model input and returns the raw per-class output. Label resolution is an
//! arg-max, so no softmax is applied.

use crate::frame::Frame;
use crate::types::{EmotionClassifier, Region, ScoreVector};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unsupported input channel count {0} (expected 1 or 3)")]
    Channels(usize),
    #[error("region {0:?} lies outside the frame")]
    RegionOutOfFrame(Region),
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
    #[error("model produced an empty score vector")]
    EmptyOutput,
    #[error("model produced {actual} scores, expected {expected}")]
    OutputSize { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Input geometry of the classifier model (NCHW, pixels scaled to [0, 1]).
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput {
    /// Side of the square input, e.g. 48 for FER-style models.
    pub size: u32,
    /// 1 for grayscale models, 3 for RGB models fed replicated gray.
    pub channels: usize,
}

impl Default for ClassifierInput {
    fn default() -> Self {
        Self { size: 48, channels: 1 }
    }
}

/// ONNX-backed [`EmotionClassifier`].
pub struct OnnxEmotionClassifier {
    session: Session,
    input: ClassifierInput,
    num_classes: usize,
}

impl OnnxEmotionClassifier {
    /// Load the model and probe its class count with one blank inference.
    pub fn load(model_path: &str, input: ClassifierInput) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ModelNotFound(model_path.to_string()));
        }
        if !matches!(input.channels, 1 | 3) {
            return Err(ClassifierError::Channels(input.channels));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        let mut classifier = Self { session, input, num_classes: 0 };
        let side = input.size as usize;
        let blank = Array4::<f32>::zeros((1, input.channels, side, side));
        let probe = classifier.infer(&blank)?;
        if probe.is_empty() {
            return Err(ClassifierError::EmptyOutput);
        }
        classifier.num_classes = probe.len();

        tracing::info!(
            path = model_path,
            input_size = input.size,
            channels = input.channels,
            classes = classifier.num_classes,
            "loaded emotion classifier"
        );
        Ok(classifier)
    }

    fn infer(&mut self, tensor: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("score extraction: {e}")))?;
        Ok(scores.to_vec())
    }
}

/// Cut `region` out of `frame` and resize it to `size` × `size`.
fn crop_face(frame: &Frame, region: &Region, size: u32) -> Result<GrayImage, ClassifierError> {
    let expected = (frame.width * frame.height) as usize;
    let view = ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or(ClassifierError::FrameSize { expected, actual: frame.data.len() })?;
    let r = region
        .clamp_to(frame.width, frame.height)
        .ok_or(ClassifierError::RegionOutOfFrame(*region))?;
    let face = imageops::crop_imm(&view, r.x, r.y, r.width, r.height).to_image();
    Ok(imageops::resize(&face, size, size, FilterType::Triangle))
}

/// Pack a face crop into an NCHW tensor, replicating gray across channels.
fn to_tensor(face: &GrayImage, channels: usize) -> Array4<f32> {
    let (w, h) = face.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, channels, h as usize, w as usize));
    for (x, y, px) in face.enumerate_pixels() {
        let v = px.0[0] as f32 / 255.0;
        for c in 0..channels {
            tensor[[0, c, y as usize, x as usize]] = v;
        }
    }
    tensor
}

impl EmotionClassifier for OnnxEmotionClassifier {
    type Error = ClassifierError;

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn classify(&mut self, frame: &Frame, region: &Region) -> Result<ScoreVector, ClassifierError> {
        let face = crop_face(frame, region, self.input.size)?;
        let tensor = to_tensor(&face, self.input.channels);
        let scores = self.infer(&tensor)?;
        if scores.len() != self.num_classes {
            return Err(ClassifierError::OutputSize {
                expected: self.num_classes,
                actual: scores.len(),
            });
        }
        Ok(ScoreVector::new(scores))
    }
}
