//! Whole-pipeline behavior with in-process collaborators and a manual clock.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use heatmapper::{
    BoundingBox, Candidate, Detector, DetectorSettings, Frame, FrameRead, FrameSource,
    HeatmapOptions, HeatmapRenderer, LocalPublisher, ManualClock, PipelineController,
    PipelineSettings, PipelineState, Publisher, ShutdownPolicy, ShutdownSignal, StorageBackend,
    StorageSettings,
};

const WIDTH: u32 = 96;
const HEIGHT: u32 = 64;

enum Read {
    Image,
    Fail,
}

/// Finite source that counts how often it is released.
struct CountingSource {
    script: VecDeque<Read>,
    releases: Arc<AtomicUsize>,
}

impl CountingSource {
    fn frames(n: usize, releases: &Arc<AtomicUsize>) -> Self {
        Self::scripted((0..n).map(|_| Read::Image).collect(), releases)
    }

    fn scripted(script: Vec<Read>, releases: &Arc<AtomicUsize>) -> Self {
        Self {
            script: script.into(),
            releases: Arc::clone(releases),
        }
    }
}

impl FrameSource for CountingSource {
    fn location(&self) -> &str {
        "test://counting"
    }

    fn read_frame(&mut self) -> Result<FrameRead> {
        match self.script.pop_front() {
            Some(Read::Image) => Ok(FrameRead::Image(RgbImage::new(WIDTH, HEIGHT))),
            Some(Read::Fail) => Err(anyhow!("camera hiccup")),
            None => Ok(FrameRead::Exhausted),
        }
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reports the same car on every frame. Optionally fires the shutdown signal
/// after a number of calls, or fails on chosen frame numbers.
struct OneCar {
    calls: usize,
    stop_after: Option<(usize, ShutdownSignal)>,
    fail_on: Vec<u64>,
}

impl OneCar {
    fn new() -> Self {
        Self {
            calls: 0,
            stop_after: None,
            fail_on: Vec::new(),
        }
    }
}

impl Detector for OneCar {
    fn name(&self) -> &'static str {
        "one-car"
    }

    fn candidates(&mut self, frame: &Frame) -> Result<Vec<Candidate>> {
        self.calls += 1;
        if let Some((limit, signal)) = &self.stop_after {
            if self.calls >= *limit {
                signal.trigger();
            }
        }
        if self.fail_on.contains(&frame.sequence) {
            return Err(anyhow!("inference crashed"));
        }
        Ok(vec![Candidate {
            class_id: 2,
            confidence: 0.9,
            bbox: BoundingBox::new(40, 20, 60, 40)?,
        }])
    }
}

/// Records every attempt. Keys under `failing_prefix` fail while
/// `failures_left` is non-zero.
#[derive(Clone, Default)]
struct RecordingPublisher {
    attempts: Arc<Mutex<Vec<String>>>,
    stored: Arc<Mutex<Vec<String>>>,
    failing_prefix: Arc<Mutex<Option<String>>>,
    failures_left: Arc<AtomicUsize>,
}

impl RecordingPublisher {
    fn failing(prefix: &str, failures: usize) -> Self {
        let publisher = Self::default();
        *publisher.failing_prefix.lock().unwrap() = Some(prefix.to_string());
        publisher.failures_left.store(failures, Ordering::SeqCst);
        publisher
    }
}

impl Publisher for RecordingPublisher {
    fn name(&self) -> &str {
        "recording"
    }

    fn publish(&mut self, local_path: &Path, key: &str) -> Result<()> {
        self.attempts.lock().unwrap().push(key.to_string());
        if let Some(prefix) = self.failing_prefix.lock().unwrap().as_deref() {
            let budget = self.failures_left.load(Ordering::SeqCst);
            if key.starts_with(prefix) && budget > 0 {
                self.failures_left.store(budget - 1, Ordering::SeqCst);
                return Err(heatmapper::HeatmapError::publish(key, "bucket unreachable").into());
            }
        }
        assert!(local_path.exists(), "{} must exist locally", local_path.display());
        self.stored.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .stored
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

struct Fixture {
    output: TempDir,
    storage: TempDir,
    settings: PipelineSettings,
    releases: Arc<AtomicUsize>,
}

impl Fixture {
    fn new(threshold: usize, policy: ShutdownPolicy) -> Self {
        let output = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        let settings = PipelineSettings {
            stream_location: "test://counting".into(),
            background_image_path: PathBuf::from("background.png"),
            local_output_dir: output.path().to_path_buf(),
            frame_interval: Duration::from_secs(5),
            emission_threshold: threshold,
            confidence_threshold: 0.3,
            model_path: "stub://vehicles".into(),
            detector: DetectorSettings::default(),
            heatmap: HeatmapOptions::default(),
            storage: StorageSettings {
                backend: StorageBackend::Local,
                container: "street-cams".into(),
                local_root: storage.path().to_path_buf(),
            },
            shutdown_policy: policy,
            max_pending_uploads: 8,
        };
        Self {
            output,
            storage,
            settings,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn renderer(&self) -> HeatmapRenderer {
        let background = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([90, 90, 90]));
        HeatmapRenderer::new(background, self.settings.heatmap.clone()).unwrap()
    }

    fn pipeline(
        &self,
        source: CountingSource,
        detector: OneCar,
        publisher: Box<dyn Publisher>,
    ) -> PipelineController {
        PipelineController::new(
            &self.settings,
            Box::new(source),
            Box::new(detector),
            self.renderer(),
            publisher,
            Arc::new(ManualClock::at_local(2024, 5, 1, 8, 0, 0)),
        )
    }

    fn output_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.output.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

#[test]
fn five_frames_emit_one_artifact_pair() {
    let fx = Fixture::new(5, ShutdownPolicy::Discard);
    let publisher =
        LocalPublisher::new(&fx.settings.storage.local_root, &fx.settings.storage.container)
            .unwrap();
    let mut pipeline = fx.pipeline(
        CountingSource::frames(5, &fx.releases),
        OneCar::new(),
        Box::new(publisher),
    );

    let stats = pipeline.run(&ShutdownSignal::new()).unwrap();
    assert_eq!(stats.frames_processed, 5);
    assert_eq!(stats.detections, 5);
    assert_eq!(stats.emissions, 1);
    assert_eq!(pipeline.buffered_points(), 0);
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    // Fifth frame is fetched after four 5s pauses.
    assert_eq!(
        fx.output_files(),
        vec![
            "detections_2024-05-01_08-00-20.csv",
            "heatmap_2024-05-01_08-00-20.png",
        ]
    );
    let listing = std::fs::read_to_string(
        fx.output.path().join("detections_2024-05-01_08-00-20.csv"),
    )
    .unwrap();
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "x,y");
    assert!(lines[1..].iter().all(|line| *line == "50,30"));

    let published = fx.storage.path().join("street-cams");
    assert!(published
        .join("heatmaps/heatmap_2024-05-01_08-00-20.png")
        .exists());
    assert!(published
        .join("detections/detections_2024-05-01_08-00-20.csv")
        .exists());

    drop(pipeline);
    assert_eq!(fx.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn sub_second_cycles_keep_every_artifact_pair() {
    let mut fx = Fixture::new(1, ShutdownPolicy::Discard);
    fx.settings.frame_interval = Duration::from_millis(500);
    let publisher = RecordingPublisher::default();
    let mut pipeline = fx.pipeline(
        CountingSource::frames(3, &fx.releases),
        OneCar::new(),
        Box::new(publisher.clone()),
    );

    let stats = pipeline.run(&ShutdownSignal::new()).unwrap();
    assert_eq!(stats.emissions, 3);

    // Frames at 08:00:00.0, 08:00:00.5 and 08:00:01.0.
    assert_eq!(
        fx.output_files(),
        vec![
            "detections_2024-05-01_08-00-00.csv",
            "detections_2024-05-01_08-00-00_1.csv",
            "detections_2024-05-01_08-00-01.csv",
            "heatmap_2024-05-01_08-00-00.png",
            "heatmap_2024-05-01_08-00-00_1.png",
            "heatmap_2024-05-01_08-00-01.png",
        ]
    );
    assert_eq!(publisher.list("heatmaps/").unwrap().len(), 3);
    assert_eq!(publisher.list("detections/").unwrap().len(), 3);
}

#[test]
fn interrupt_before_threshold_discards_buffer() {
    let fx = Fixture::new(5, ShutdownPolicy::Discard);
    let shutdown = ShutdownSignal::new();
    let mut detector = OneCar::new();
    detector.stop_after = Some((2, shutdown.clone()));
    let publisher = RecordingPublisher::default();
    let mut pipeline = fx.pipeline(
        CountingSource::frames(5, &fx.releases),
        detector,
        Box::new(publisher.clone()),
    );

    let stats = pipeline.run(&shutdown).unwrap();
    assert_eq!(stats.frames_processed, 2);
    assert_eq!(stats.detections, 2);
    assert_eq!(stats.emissions, 0);
    assert_eq!(pipeline.buffered_points(), 0);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(fx.output_files().is_empty());
    assert!(publisher.attempts.lock().unwrap().is_empty());

    drop(pipeline);
    assert_eq!(fx.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn interrupt_with_flush_policy_emits_remaining_points() {
    let fx = Fixture::new(5, ShutdownPolicy::Flush);
    let shutdown = ShutdownSignal::new();
    let mut detector = OneCar::new();
    detector.stop_after = Some((2, shutdown.clone()));
    let publisher = RecordingPublisher::default();
    let mut pipeline = fx.pipeline(
        CountingSource::frames(5, &fx.releases),
        detector,
        Box::new(publisher.clone()),
    );

    let stats = pipeline.run(&shutdown).unwrap();
    assert_eq!(stats.emissions, 1);
    assert_eq!(fx.output_files().len(), 2);
    let csv = fx
        .output_files()
        .into_iter()
        .find(|name| name.ends_with(".csv"))
        .unwrap();
    let listing = std::fs::read_to_string(fx.output.path().join(csv)).unwrap();
    assert_eq!(listing.lines().count(), 3);
    assert_eq!(publisher.stored.lock().unwrap().len(), 2);
    assert_eq!(fx.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn heatmap_publish_failure_still_publishes_listing() {
    let fx = Fixture::new(3, ShutdownPolicy::Discard);
    let publisher = RecordingPublisher::failing("heatmaps/", usize::MAX);
    let mut pipeline = fx.pipeline(
        CountingSource::frames(3, &fx.releases),
        OneCar::new(),
        Box::new(publisher.clone()),
    );

    let stats = pipeline.run(&ShutdownSignal::new()).unwrap();
    assert_eq!(stats.emissions, 1);
    assert_eq!(stats.publish_failures, 1);
    assert_eq!(pipeline.buffered_points(), 0);

    let attempts = publisher.attempts.lock().unwrap().clone();
    assert!(attempts[0].starts_with("heatmaps/"));
    assert!(attempts[1].starts_with("detections/"));
    assert_eq!(
        publisher.list("detections/").unwrap().len(),
        1,
        "listing must be published even though the heatmap upload failed"
    );

    // Still queued after the shutdown retry; the local copy stays on disk.
    let pending: Vec<_> = pipeline.pending_uploads().iter().cloned().collect();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].key.starts_with("heatmaps/"));
    assert!(pending[0].local_path.exists());
}

#[test]
fn queued_upload_is_retried_on_next_cycle() {
    let fx = Fixture::new(2, ShutdownPolicy::Discard);
    // Only the first heatmap upload fails.
    let publisher = RecordingPublisher::failing("heatmaps/", 1);
    let mut pipeline = fx.pipeline(
        CountingSource::frames(4, &fx.releases),
        OneCar::new(),
        Box::new(publisher.clone()),
    );

    let stats = pipeline.run(&ShutdownSignal::new()).unwrap();
    assert_eq!(stats.emissions, 2);
    assert_eq!(stats.publish_failures, 1);
    assert!(pipeline.pending_uploads().is_empty());

    // Cycles fire on frames 2 and 4; the second starts by retrying the first
    // cycle's heatmap.
    let attempts = publisher.attempts.lock().unwrap().clone();
    assert_eq!(
        attempts,
        vec![
            "heatmaps/heatmap_2024-05-01_08-00-05.png",
            "detections/detections_2024-05-01_08-00-05.csv",
            "heatmaps/heatmap_2024-05-01_08-00-05.png",
            "heatmaps/heatmap_2024-05-01_08-00-15.png",
            "detections/detections_2024-05-01_08-00-15.csv",
        ]
    );
    assert_eq!(publisher.list("heatmaps/").unwrap().len(), 2);
}

#[test]
fn grab_and_detector_failures_are_skipped() {
    let fx = Fixture::new(100, ShutdownPolicy::Discard);
    let source = CountingSource::scripted(
        vec![Read::Image, Read::Fail, Read::Image, Read::Fail, Read::Image],
        &fx.releases,
    );
    let mut detector = OneCar::new();
    detector.fail_on = vec![2];
    let mut pipeline = fx.pipeline(source, detector, Box::new(RecordingPublisher::default()));

    let stats = pipeline.run(&ShutdownSignal::new()).unwrap();
    assert_eq!(stats.frames_processed, 3);
    assert_eq!(stats.detector_failures, 1);
    assert_eq!(stats.detections, 2);
    assert_eq!(pipeline.sampler_stats().transient_failures, 2);
    assert_eq!(fx.releases.load(Ordering::SeqCst), 1);
}
