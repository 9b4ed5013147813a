//! Device-side capture → locate → classify → emit loop.
//!
//! One thread runs each cycle to completion before starting the next, so at
//! most one frame is ever in flight. The only blocking points are frame
//! acquisition and the transport write; a slow transport throttles the loop.

use crate::frame::{Frame, Normalization};
use crate::types::{EmotionClassifier, FaceLocator, Label, LabelTable};
use crate::wire;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Produces one frame per call, blocking until it is available.
pub trait FrameSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn capture(&mut self) -> Result<Frame, Self::Error>;
}

#[derive(Error, Debug)]
pub enum EmitError {
    #[error("transport write failed for label {label:?}: {source}")]
    Write {
        label: String,
        #[source]
        source: std::io::Error,
    },
}

/// Writes framed labels to the outbound byte transport.
pub struct LabelEmitter<W> {
    sink: W,
    emitted: u64,
}

impl<W: Write> LabelEmitter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, emitted: 0 }
    }

    /// Write `label` plus its terminator and flush.
    ///
    /// Blocks while the transport applies backpressure: timed-out and
    /// interrupted writes are retried until the bytes are accepted. Any other
    /// error is unrecoverable at this layer.
    pub fn emit(&mut self, label: &Label) -> Result<(), EmitError> {
        let frame = wire::encode(label);
        self.write_frame(&frame).map_err(|source| EmitError::Write {
            label: label.to_string(),
            source,
        })?;
        self.emitted += 1;
        tracing::debug!(label = %label, "emitted label");
        Ok(())
    }

    fn write_frame(&mut self, mut rest: &[u8]) -> io::Result<()> {
        let mut stalls = 0u32;
        while !rest.is_empty() {
            match self.sink.write(rest) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "transport accepted no bytes")),
                Ok(n) => rest = &rest[n..],
                Err(e) if is_transient(&e) => {
                    stalls += 1;
                    tracing::debug!(stalls, error = %e, "transport write stalled; retrying");
                }
                Err(e) => return Err(e),
            }
        }
        loop {
            match self.sink.flush() {
                Ok(()) => return Ok(()),
                Err(e) if is_transient(&e) => {
                    stalls += 1;
                    tracing::debug!(stalls, error = %e, "transport flush stalled; retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Labels written so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

}

/// Errors that leave a transport usable: timeouts and interrupted calls.
pub fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// False when no frame could be acquired.
    pub captured: bool,
    pub regions: usize,
    pub emitted: usize,
    /// Regions skipped because classification or label resolution failed.
    pub skipped: usize,
    /// The locator failed, so the whole frame was skipped.
    pub locate_failed: bool,
}

/// Tuning knobs for [`InferenceLoop`].
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub normalization: Normalization,
    /// Pause after a failed capture before the next attempt.
    pub capture_retry_delay: Duration,
    /// Log a throughput summary every this many cycles (0 disables it).
    pub stats_interval: u64,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            normalization: Normalization::default(),
            capture_retry_delay: Duration::from_millis(100),
            stats_interval: 100,
        }
    }
}

/// Running totals used for the periodic throughput log.
#[derive(Debug)]
struct LoopStats {
    cycles: u64,
    faces: u64,
    labels: u64,
    window_start: Instant,
    window_cycles: u64,
}

impl LoopStats {
    fn new() -> Self {
        Self {
            cycles: 0,
            faces: 0,
            labels: 0,
            window_start: Instant::now(),
            window_cycles: 0,
        }
    }

    fn record(&mut self, report: &CycleReport, interval: u64) {
        self.cycles += 1;
        self.window_cycles += 1;
        self.faces += report.regions as u64;
        self.labels += report.emitted as u64;

        if interval == 0 || self.window_cycles < interval {
            return;
        }
        let elapsed = self.window_start.elapsed().as_secs_f32();
        let fps = if elapsed > 0.0 { self.window_cycles as f32 / elapsed } else { 0.0 };
        tracing::info!(
            cycles = self.cycles,
            faces = self.faces,
            labels = self.labels,
            fps = %format!("{fps:.1}"),
            "inference loop throughput"
        );
        self.window_start = Instant::now();
        self.window_cycles = 0;
    }
}

/// The device-resident inference loop.
pub struct InferenceLoop<S, L, C, W> {
    source: S,
    locator: L,
    classifier: C,
    labels: LabelTable,
    emitter: LabelEmitter<W>,
    options: LoopOptions,
    stats: LoopStats,
}

impl<S, L, C, W> InferenceLoop<S, L, C, W>
where
    S: FrameSource,
    L: FaceLocator,
    C: EmotionClassifier,
    W: Write,
{
    pub fn new(
        source: S,
        locator: L,
        classifier: C,
        labels: LabelTable,
        emitter: LabelEmitter<W>,
        options: LoopOptions,
    ) -> Self {
        Self {
            source,
            locator,
            classifier,
            labels,
            emitter,
            options,
            stats: LoopStats::new(),
        }
    }

    /// Run one capture-to-emit cycle.
    ///
    /// Only a transport write failure is returned as an error; capture and
    /// inference failures are logged and reflected in the report.
    pub fn run_cycle(&mut self) -> Result<CycleReport, EmitError> {
        let mut report = CycleReport::default();

        let mut frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame capture failed");
                return Ok(report);
            }
        };
        report.captured = true;

        self.options.normalization.apply(&mut frame);

        let regions = match self.locator.locate(&frame) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "face locator failed; skipping frame");
                report.locate_failed = true;
                return Ok(report);
            }
        };
        report.regions = regions.len();

        for region in &regions {
            let scores = match self.classifier.classify(&frame, region) {
                Ok(scores) => scores,
                Err(e) => {
                    tracing::warn!(seq = frame.sequence, ?region, error = %e, "emotion classifier failed; skipping region");
                    report.skipped += 1;
                    continue;
                }
            };

            let label = match self.labels.resolve(&scores) {
                Ok(label) => label,
                Err(e) => {
                    tracing::warn!(seq = frame.sequence, ?region, error = %e, "label resolution failed; skipping region");
                    report.skipped += 1;
                    continue;
                }
            };

            self.emitter.emit(label)?;
            report.emitted += 1;
        }

        Ok(report)
    }

    /// Run cycles for the lifetime of the device.
    ///
    /// Returns only when the transport write fails.
    pub fn run(&mut self) -> Result<(), EmitError> {
        tracing::info!(labels = self.labels.len(), "inference loop started");
        loop {
            let report = self.run_cycle()?;
            if !report.captured {
                std::thread::sleep(self.options.capture_retry_delay);
                continue;
            }
            self.stats.record(&report, self.options.stats_interval);
        }
    }

    pub fn emitter(&self) -> &LabelEmitter<W> {
        &self.emitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Region, ScoreVector};
    use std::collections::VecDeque;
    use std::io;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct FakeError(&'static str);

    /// Hands out queued capture results; errors once the queue is empty.
    struct FakeSource(VecDeque<Result<Frame, FakeError>>);

    impl FrameSource for FakeSource {
        type Error = FakeError;

        fn capture(&mut self) -> Result<Frame, FakeError> {
            self.0.pop_front().unwrap_or(Err(FakeError("exhausted")))
        }
    }

    struct FakeLocator {
        regions: Vec<Region>,
        fail: bool,
        seen_pixels: Vec<u8>,
    }

    impl FaceLocator for FakeLocator {
        type Error = FakeError;

        fn locate(&mut self, frame: &Frame) -> Result<Vec<Region>, FakeError> {
            self.seen_pixels = frame.data.clone();
            if self.fail {
                return Err(FakeError("locator exploded"));
            }
            Ok(self.regions.clone())
        }
    }

    /// Scores keyed by region x offset; `None` makes classification fail.
    struct FakeClassifier(Vec<(u32, Option<Vec<f32>>)>);

    impl EmotionClassifier for FakeClassifier {
        type Error = FakeError;

        fn num_classes(&self) -> usize {
            4
        }

        fn classify(&mut self, _frame: &Frame, region: &Region) -> Result<ScoreVector, FakeError> {
            match self.0.iter().find(|(x, _)| *x == region.x) {
                Some((_, Some(scores))) => Ok(ScoreVector::new(scores.clone())),
                _ => Err(FakeError("classifier exploded")),
            }
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "uart gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Times out `stalls` times, then accepts everything.
    struct SlowLink {
        stalls: usize,
        written: Vec<u8>,
    }

    impl Write for SlowLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.stalls > 0 {
                self.stalls -= 1;
                return Err(io::Error::new(io::ErrorKind::TimedOut, "operation timed out"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn labels() -> LabelTable {
        LabelTable::parse("happy\nsad\nangry\nneutral\n").unwrap()
    }

    fn frame() -> Frame {
        Frame::new(vec![100; 16], 4, 4, 7)
    }

    fn options() -> LoopOptions {
        LoopOptions {
            normalization: Normalization::IDENTITY,
            capture_retry_delay: Duration::ZERO,
            stats_interval: 0,
        }
    }

    fn build<W: Write>(
        locator: FakeLocator,
        classifier: FakeClassifier,
        sink: W,
    ) -> InferenceLoop<FakeSource, FakeLocator, FakeClassifier, W> {
        InferenceLoop::new(
            FakeSource(VecDeque::from([Ok(frame())])),
            locator,
            classifier,
            labels(),
            LabelEmitter::new(sink),
            options(),
        )
    }

    #[test]
    fn test_emitter_writes_framed_label() {
        let mut emitter = LabelEmitter::new(Vec::new());
        emitter.emit(&Label::new("happy").unwrap()).unwrap();
        emitter.emit(&Label::new("sad").unwrap()).unwrap();
        assert_eq!(emitter.get_ref().as_slice(), b"happy\nsad\n");
        assert_eq!(emitter.emitted(), 2);
    }

    #[test]
    fn test_emitter_waits_out_backpressure() {
        let mut emitter = LabelEmitter::new(SlowLink { stalls: 2, written: Vec::new() });
        emitter.emit(&Label::new("happy").unwrap()).unwrap();
        assert_eq!(emitter.get_ref().written, b"happy\n");
        assert_eq!(emitter.emitted(), 1);
    }

    #[test]
    fn test_transient_error_kinds() {
        assert!(is_transient(&io::Error::new(io::ErrorKind::TimedOut, "t")));
        assert!(is_transient(&io::Error::new(io::ErrorKind::Interrupted, "i")));
        assert!(!is_transient(&io::Error::new(io::ErrorKind::BrokenPipe, "b")));
        assert!(!is_transient(&io::Error::new(io::ErrorKind::PermissionDenied, "p")));
    }

    #[test]
    fn test_emitter_write_failure_is_reported() {
        let mut emitter = LabelEmitter::new(BrokenPipe);
        let err = emitter.emit(&Label::new("happy").unwrap()).unwrap_err();
        assert!(err.to_string().contains("happy"));
        assert_eq!(emitter.emitted(), 0);
    }

    #[test]
    fn test_cycle_emits_one_label_per_face() {
        let locator = FakeLocator {
            regions: vec![Region::new(0, 0, 2, 2), Region::new(2, 2, 2, 2)],
            fail: false,
            seen_pixels: Vec::new(),
        };
        let classifier = FakeClassifier(vec![
            (0, Some(vec![0.9, 0.05, 0.03, 0.02])),
            (2, Some(vec![0.2, 0.9, 0.9, 0.1])),
        ]);
        let mut pipeline = build(locator, classifier, Vec::new());

        let report = pipeline.run_cycle().unwrap();
        assert_eq!(
            report,
            CycleReport { captured: true, regions: 2, emitted: 2, skipped: 0, locate_failed: false }
        );
        assert_eq!(pipeline.emitter().get_ref().as_slice(), b"happy\nsad\n");
    }

    #[test]
    fn test_failed_region_does_not_stop_the_others() {
        let locator = FakeLocator {
            regions: vec![Region::new(0, 0, 1, 1), Region::new(1, 0, 1, 1), Region::new(2, 0, 1, 1)],
            fail: false,
            seen_pixels: Vec::new(),
        };
        let classifier = FakeClassifier(vec![
            (0, Some(vec![0.0, 0.0, 1.0, 0.0])),
            (1, None),
            (2, Some(vec![0.0, 0.0, 0.0, 1.0])),
        ]);
        let mut pipeline = build(locator, classifier, Vec::new());

        let report = pipeline.run_cycle().unwrap();
        assert_eq!(report.emitted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(pipeline.emitter().get_ref().as_slice(), b"angry\nneutral\n");
    }

    #[test]
    fn test_mismatched_score_vector_skips_region() {
        let locator = FakeLocator {
            regions: vec![Region::new(0, 0, 1, 1), Region::new(1, 0, 1, 1)],
            fail: false,
            seen_pixels: Vec::new(),
        };
        let classifier = FakeClassifier(vec![
            (0, Some(vec![0.5, 0.5])),
            (1, Some(vec![0.0, 1.0, 0.0, 0.0])),
        ]);
        let mut pipeline = build(locator, classifier, Vec::new());

        let report = pipeline.run_cycle().unwrap();
        assert_eq!((report.emitted, report.skipped), (1, 1));
        assert_eq!(pipeline.emitter().get_ref().as_slice(), b"sad\n");
    }

    #[test]
    fn test_locator_failure_skips_frame() {
        let locator = FakeLocator { regions: vec![], fail: true, seen_pixels: Vec::new() };
        let mut pipeline = build(locator, FakeClassifier(vec![]), Vec::new());

        let report = pipeline.run_cycle().unwrap();
        assert!(report.captured);
        assert!(report.locate_failed);
        assert!(pipeline.emitter().get_ref().is_empty());
    }

    #[test]
    fn test_no_faces_emits_nothing() {
        let locator = FakeLocator { regions: vec![], fail: false, seen_pixels: Vec::new() };
        let mut pipeline = build(locator, FakeClassifier(vec![]), Vec::new());

        let report = pipeline.run_cycle().unwrap();
        assert_eq!(report.regions, 0);
        assert_eq!(report.emitted, 0);
    }

    #[test]
    fn test_capture_failure_is_not_fatal() {
        let locator = FakeLocator {
            regions: vec![Region::new(0, 0, 1, 1)],
            fail: false,
            seen_pixels: Vec::new(),
        };
        let classifier = FakeClassifier(vec![(0, Some(vec![1.0, 0.0, 0.0, 0.0]))]);
        let mut pipeline = InferenceLoop::new(
            FakeSource(VecDeque::from([Err(FakeError("sensor timeout")), Ok(frame())])),
            locator,
            classifier,
            labels(),
            LabelEmitter::new(Vec::new()),
            options(),
        );

        let first = pipeline.run_cycle().unwrap();
        assert!(!first.captured);
        let second = pipeline.run_cycle().unwrap();
        assert_eq!(second.emitted, 1);
        assert_eq!(pipeline.emitter().get_ref().as_slice(), b"happy\n");
    }

    #[test]
    fn test_frame_is_normalized_before_location() {
        let locator = FakeLocator { regions: vec![], fail: false, seen_pixels: Vec::new() };
        let mut pipeline = build(locator, FakeClassifier(vec![]), Vec::new());
        pipeline.options.normalization = Normalization::default();

        pipeline.run_cycle().unwrap();
        assert!(pipeline.locator.seen_pixels.iter().all(|&p| p == 150));
    }

    #[test]
    fn test_write_failure_is_fatal() {
        let locator = FakeLocator {
            regions: vec![Region::new(0, 0, 1, 1)],
            fail: false,
            seen_pixels: Vec::new(),
        };
        let classifier = FakeClassifier(vec![(0, Some(vec![1.0, 0.0, 0.0, 0.0]))]);
        let mut pipeline = build(locator, classifier, BrokenPipe);

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, EmitError::Write { .. }));
    }
}
