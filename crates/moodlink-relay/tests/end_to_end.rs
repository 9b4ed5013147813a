//! Device loop → serial bytes → relay reader → publisher, with fakes at the edges.

use moodlink_core::{
    EmotionClassifier, FaceLocator, Frame, FrameSource, InferenceLoop, LabelEmitter, LabelTable, LoopOptions, Region,
    ScoreVector,
};
use moodlink_relay::{Bus, BusError, BusEvent, Publisher, PublisherOptions, Relay, RelayOptions, RelayReader, Tick};
use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("unavailable")]
struct Unavailable;

struct StillCamera(usize);

impl FrameSource for StillCamera {
    type Error = Unavailable;

    fn capture(&mut self) -> Result<Frame, Unavailable> {
        if self.0 == 0 {
            return Err(Unavailable);
        }
        self.0 -= 1;
        Ok(Frame::new(vec![128; 64 * 48], 64, 48, 0))
    }
}

/// Reports a fixed set of faces in every frame.
struct FixedFaces(Vec<Region>);

impl FaceLocator for FixedFaces {
    type Error = Unavailable;

    fn locate(&mut self, _frame: &Frame) -> Result<Vec<Region>, Unavailable> {
        Ok(self.0.clone())
    }
}

/// Scores a face by its x position: x = 0 is happy, anything else sad.
struct ByPosition;

impl EmotionClassifier for ByPosition {
    type Error = Unavailable;

    fn num_classes(&self) -> usize {
        4
    }

    fn classify(&mut self, _frame: &Frame, region: &Region) -> Result<ScoreVector, Unavailable> {
        Ok(if region.x == 0 {
            ScoreVector::new(vec![0.7, 0.1, 0.1, 0.1])
        } else {
            ScoreVector::new(vec![0.1, 0.6, 0.2, 0.1])
        })
    }
}

#[derive(Default)]
struct RecordingBus {
    events: VecDeque<Result<Option<BusEvent>, BusError>>,
    published: Vec<(String, String)>,
}

impl Bus for RecordingBus {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), BusError> {
        self.published.push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    fn service(&mut self, _wait: Duration) -> Result<Option<BusEvent>, BusError> {
        self.events.pop_front().unwrap_or(Ok(None))
    }
}

fn label_table() -> LabelTable {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "happy\nsad\nangry\nneutral").unwrap();
    LabelTable::load(file.path()).unwrap()
}

/// Run the device loop for `frames` cycles and return the bytes it wrote.
fn device_output(frames: usize, faces: Vec<Region>) -> Vec<u8> {
    let labels = label_table();
    labels.check_classes(ByPosition.num_classes()).unwrap();
    let mut device = InferenceLoop::new(
        StillCamera(frames),
        FixedFaces(faces),
        ByPosition,
        labels,
        LabelEmitter::new(Vec::new()),
        LoopOptions::default(),
    );
    for _ in 0..frames {
        device.run_cycle().unwrap();
    }
    device.emitter().get_ref().clone()
}

fn relay(bytes: Vec<u8>) -> Relay<Cursor<Vec<u8>>, RecordingBus> {
    let mut bus = RecordingBus::default();
    bus.events.push_back(Ok(Some(BusEvent::Connected)));
    let options = PublisherOptions {
        topic: "moodlink/emotion".into(),
        connect_wait: Duration::ZERO,
        service_wait: Duration::ZERO,
        ..PublisherOptions::default()
    };
    Relay::new(
        RelayReader::new(Cursor::new(bytes)),
        Publisher::new(bus, options),
        RelayOptions::default(),
    )
}

#[test]
fn happy_face_reaches_the_bus() {
    let bytes = device_output(1, vec![Region::new(0, 0, 24, 24)]);
    assert_eq!(bytes, b"happy\n");

    let mut relay = relay(bytes);
    assert_eq!(relay.tick(), Tick::Forwarded(1));
    assert_eq!(relay.tick(), Tick::Idle);
    assert_eq!(
        relay.publisher().bus().published,
        vec![("moodlink/emotion".to_string(), "happy".to_string())]
    );
}

#[test]
fn every_face_of_every_frame_is_published_in_order() {
    let bytes = device_output(3, vec![Region::new(0, 0, 16, 16), Region::new(32, 8, 16, 16)]);
    assert_eq!(bytes, b"happy\nsad\nhappy\nsad\nhappy\nsad\n");

    let mut relay = relay(bytes);
    while relay.tick() != Tick::Idle {}
    let payloads: Vec<&str> = relay
        .publisher()
        .bus()
        .published
        .iter()
        .map(|(_, p)| p.as_str())
        .collect();
    assert_eq!(payloads, ["happy", "sad", "happy", "sad", "happy", "sad"]);
}
