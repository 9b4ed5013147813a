use moodlink_core::{ClassifierInput, LoopOptions, Normalization};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Device daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Frames discarded at startup while the sensor settles.
    pub warmup_frames: usize,
    /// Directory containing the ONNX models and label table.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub classifier_model: String,
    pub labels_path: PathBuf,
    pub detection_threshold: f32,
    pub classifier_input: ClassifierInput,
    pub normalization: Normalization,
    /// Serial port the labels are written to.
    pub serial_port: String,
    pub baud_rate: u32,
    pub write_timeout: Duration,
    pub capture_retry: Duration,
    /// Cycles between throughput log lines (0 disables).
    pub stats_interval: u64,
}

impl Config {
    /// Load configuration from `MOODLINK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = lookup("MOODLINK_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(moodlink_core::default_model_dir);
        let labels_path = lookup("MOODLINK_LABELS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join("labels.txt"));
        let defaults = Normalization::default();

        Self {
            camera_device: lookup("MOODLINK_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            frame_width: parse_or(&lookup, "MOODLINK_FRAME_WIDTH", 320),
            frame_height: parse_or(&lookup, "MOODLINK_FRAME_HEIGHT", 240),
            warmup_frames: parse_or(&lookup, "MOODLINK_WARMUP_FRAMES", 10),
            detector_model: lookup("MOODLINK_DETECTOR_MODEL").unwrap_or_else(|| "det_500m.onnx".to_string()),
            classifier_model: lookup("MOODLINK_CLASSIFIER_MODEL").unwrap_or_else(|| "emotion.onnx".to_string()),
            model_dir,
            labels_path,
            detection_threshold: parse_or(&lookup, "MOODLINK_DETECTION_THRESHOLD", 0.5),
            classifier_input: ClassifierInput {
                size: parse_or(&lookup, "MOODLINK_CLASSIFIER_INPUT", 48),
                channels: parse_or(&lookup, "MOODLINK_CLASSIFIER_CHANNELS", 1),
            },
            normalization: Normalization {
                gamma: parse_or(&lookup, "MOODLINK_GAMMA", defaults.gamma),
                contrast: parse_or(&lookup, "MOODLINK_CONTRAST", defaults.contrast),
                brightness: parse_or(&lookup, "MOODLINK_BRIGHTNESS", defaults.brightness),
            },
            serial_port: lookup("MOODLINK_SERIAL_PORT").unwrap_or_else(|| "/dev/ttyGS0".to_string()),
            baud_rate: parse_or(&lookup, "MOODLINK_BAUD_RATE", 115_200),
            write_timeout: Duration::from_millis(parse_or(&lookup, "MOODLINK_WRITE_TIMEOUT_MS", 1000)),
            capture_retry: Duration::from_millis(parse_or(&lookup, "MOODLINK_CAPTURE_RETRY_MS", 100)),
            stats_interval: parse_or(&lookup, "MOODLINK_STATS_INTERVAL", 100),
        }
    }

    pub fn detector_model_path(&self) -> String {
        self.model_dir.join(&self.detector_model).to_string_lossy().into_owned()
    }

    pub fn classifier_model_path(&self) -> String {
        self.model_dir.join(&self.classifier_model).to_string_lossy().into_owned()
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            normalization: self.normalization,
            capture_retry_delay: self.capture_retry,
            stats_interval: self.stats_interval,
        }
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid value; using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("MOODLINK_MODEL_DIR", "/opt/models")]);
        assert_eq!(cfg.camera_device, "/dev/video0");
        assert_eq!((cfg.frame_width, cfg.frame_height), (320, 240));
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.labels_path, PathBuf::from("/opt/models/labels.txt"));
        assert_eq!(cfg.detector_model_path(), "/opt/models/det_500m.onnx");
        assert_eq!(cfg.classifier_model_path(), "/opt/models/emotion.onnx");
        assert_eq!(cfg.normalization, Normalization::default());
        assert_eq!(cfg.write_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("MOODLINK_SERIAL_PORT", "/dev/ttyAMA0"),
            ("MOODLINK_BAUD_RATE", "921600"),
            ("MOODLINK_CONTRAST", "1.2"),
            ("MOODLINK_CLASSIFIER_CHANNELS", "3"),
            ("MOODLINK_LABELS_PATH", "/etc/moodlink/labels.txt"),
        ]);
        assert_eq!(cfg.serial_port, "/dev/ttyAMA0");
        assert_eq!(cfg.baud_rate, 921_600);
        assert!((cfg.normalization.contrast - 1.2).abs() < 1e-6);
        assert_eq!(cfg.classifier_input.channels, 3);
        assert_eq!(cfg.labels_path, PathBuf::from("/etc/moodlink/labels.txt"));
    }

    #[test]
    fn test_invalid_number_falls_back() {
        let cfg = config(&[("MOODLINK_BAUD_RATE", "fast"), ("MOODLINK_WARMUP_FRAMES", "-3")]);
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.warmup_frames, 10);
    }
}
