use anyhow::{Context, Result};
use moodlink_core::{EmotionClassifier, InferenceLoop, LabelEmitter, LabelTable};
use moodlink_core::{OnnxEmotionClassifier, OnnxFaceLocator};
use moodlink_hw::{Camera, LinkSettings, SerialLink};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "moodlinkd starting");
    let config = Config::from_env();

    if let Err(e) = run(&config) {
        tracing::error!("moodlinkd stopped: {e:#}");
        return Err(e);
    }
    Ok(())
}

/// Acquire every resource up front (fail fast), then run the loop until the
/// transport write fails.
fn run(config: &Config) -> Result<()> {
    let labels = LabelTable::load(&config.labels_path).context("loading label table")?;

    let locator = OnnxFaceLocator::load(&config.detector_model_path(), config.detection_threshold)
        .context("loading face locator")?;
    let classifier = OnnxEmotionClassifier::load(&config.classifier_model_path(), config.classifier_input)
        .context("loading emotion classifier")?;
    labels
        .check_classes(classifier.num_classes())
        .context("label table does not match the classifier")?;

    let mut camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .context("initializing capture source")?;
    camera.warm_up(config.warmup_frames);

    let link = SerialLink::open(LinkSettings {
        path: config.serial_port.clone(),
        baud_rate: config.baud_rate,
        timeout: config.write_timeout,
    })
    .context("opening label transport")?;

    let mut pipeline = InferenceLoop::new(
        camera,
        locator,
        classifier,
        labels,
        LabelEmitter::new(link),
        config.loop_options(),
    );
    pipeline.run().context("label transport write failed")?;
    Ok(())
}
