use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence in [0, 1]; 1.0 when the locator does not score regions.
    pub confidence: f32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height, confidence: 1.0 }
    }

    /// Clip the region to a `frame_width` × `frame_height` frame.
    ///
    /// Returns `None` when nothing of the region remains inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<Region> {
        let x0 = self.x.min(frame_width);
        let y0 = self.y.min(frame_height);
        let x1 = self.x.saturating_add(self.width).min(frame_width);
        let y1 = self.y.saturating_add(self.height).min(frame_height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Region {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
            confidence: self.confidence,
        })
    }
}

/// Per-class scores produced by the classifier for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    pub fn new(scores: Vec<f32>) -> Self {
        Self(scores)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Index of the highest score. Ties resolve to the lowest index; NaN
    /// entries never win. `None` for an empty or all-NaN vector.
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &score) in self.0.iter().enumerate() {
            if score.is_nan() {
                continue;
            }
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((i, score)),
            }
        }
        best.map(|(i, _)| i)
    }
}

impl From<Vec<f32>> for ScoreVector {
    fn from(scores: Vec<f32>) -> Self {
        Self(scores)
    }
}

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("label is empty")]
    Empty,
    #[error("label {0:?} contains a line break")]
    LineBreak(String),
    #[error("label {0:?} has leading or trailing whitespace")]
    Padded(String),
    #[error("failed to read label table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("label table {0} has no labels")]
    EmptyTable(String),
    #[error("label table has {labels} entries but the classifier produces {classes} classes")]
    ClassCountMismatch { labels: usize, classes: usize },
}

/// Emotion name sent over the wire.
///
/// Never empty, never padded, never contains a line break, so the newline
/// framing is unambiguous and a decoded label equals the encoded one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label(String);

impl Label {
    pub fn new(text: impl Into<String>) -> Result<Self, LabelError> {
        let text = text.into();
        if text.is_empty() {
            return Err(LabelError::Empty);
        }
        if text.contains(['\n', '\r']) {
            return Err(LabelError::LineBreak(text));
        }
        if text.trim() != text {
            return Err(LabelError::Padded(text));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ResolveError {
    #[error("score vector has {actual} classes, label table has {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("score vector has no comparable score")]
    NoScore,
}

/// Ordered label table; entry `i` names class `i` of every score vector.
#[derive(Debug, Clone)]
pub struct LabelTable {
    labels: Vec<Label>,
}

impl LabelTable {
    pub fn new(labels: Vec<Label>) -> Self {
        Self { labels }
    }

    /// Parse one label per line. Lines are trimmed and blank lines ignored.
    pub fn parse(text: &str) -> Result<Self, LabelError> {
        let labels = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Label::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { labels })
    }

    /// Load the table from a text file. An empty table is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LabelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::parse(&text)?;
        if table.is_empty() {
            return Err(LabelError::EmptyTable(path.display().to_string()));
        }
        tracing::info!(path = %path.display(), count = table.len(), "loaded label table");
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Label> {
        self.labels.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    /// Verify the table matches a classifier's class count.
    pub fn check_classes(&self, classes: usize) -> Result<(), LabelError> {
        if classes != self.labels.len() {
            return Err(LabelError::ClassCountMismatch {
                labels: self.labels.len(),
                classes,
            });
        }
        Ok(())
    }

    /// Pick the label at the arg-max position of `scores`.
    pub fn resolve(&self, scores: &ScoreVector) -> Result<&Label, ResolveError> {
        if scores.len() != self.labels.len() {
            return Err(ResolveError::LengthMismatch {
                expected: self.labels.len(),
                actual: scores.len(),
            });
        }
        let idx = scores.argmax().ok_or(ResolveError::NoScore)?;
        Ok(&self.labels[idx])
    }
}

/// Locates candidate faces in a frame.
///
/// Implementations may keep inference state between calls, hence `&mut self`.
pub trait FaceLocator {
    type Error: std::error::Error + Send + Sync + 'static;

    fn locate(&mut self, frame: &Frame) -> Result<Vec<Region>, Self::Error>;
}

/// Scores one face region against the known emotion classes.
pub trait EmotionClassifier {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Length of every score vector this classifier produces.
    fn num_classes(&self) -> usize;

    fn classify(&mut self, frame: &Frame, region: &Region) -> Result<ScoreVector, Self::Error>;
}
