//! moodlink-core — the emotion-signaling pipeline shared by device and host.
//!
//! Label tables and arg-max resolution, the newline wire format, the
//! device-side inference loop, and ONNX Runtime implementations of the face
//! locator and emotion classifier capabilities.

pub mod classifier;
pub mod detector;
pub mod frame;
pub mod pipeline;
pub mod types;
pub mod wire;

use std::path::PathBuf;

pub use classifier::{ClassifierInput, OnnxEmotionClassifier};
pub use detector::OnnxFaceLocator;
pub use frame::{Frame, Normalization};
pub use pipeline::{FrameSource, InferenceLoop, LabelEmitter, LoopOptions};
pub use types::{EmotionClassifier, FaceLocator, Label, LabelTable, Region, ScoreVector};
pub use wire::LineDecoder;

/// Default directory holding the ONNX models and `labels.txt`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("moodlink/models")
}
