//! Acquisition → detection → accumulation → emission loop.
//!
//! `PipelineController` pulls paced frames from a `FrameSampler`, runs the
//! detector, appends one center point per detection, and once the buffer
//! reaches the emission threshold renders a heatmap and a point listing,
//! publishes both, and clears the buffer.
//!
//! Nothing inside the loop is fatal. Detector, render and publish failures are
//! logged and counted; failed uploads go on a bounded retry queue.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifact::{write_point_listing, ArtifactNames};
use crate::buffer::PointBuffer;
use crate::clock::{Clock, ShutdownSignal};
use crate::config::{PipelineSettings, ShutdownPolicy};
use crate::detect::{open_detector, Detector, TargetClasses};
use crate::frame::Frame;
use crate::heatmap::{load_background, Emission, HeatmapRenderer};
use crate::ingest::{open_source, FrameSampler, FrameSource, SamplerStats};
use crate::publish::{open_publisher, PendingUpload, PendingUploads, Publisher};

/// Frames between periodic `debug` stats lines.
const STATS_LOG_EVERY: u64 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// Constructed, not yet run.
    Idle,
    Running,
    /// Shutdown observed; no new frames are fetched.
    Draining,
    /// Source released, run finished.
    Stopped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub detections: u64,
    pub emissions: u64,
    pub detector_failures: u64,
    pub render_failures: u64,
    pub publish_failures: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmissionOutcome {
    /// Nothing to draw; buffer left as is.
    NoOp,
    /// Rendering failed; buffer retained for the next cycle.
    RenderFailed,
    /// Heatmap written; buffer cleared.
    Emitted,
}

/// What one emission cycle did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmissionReport {
    pub outcome: EmissionOutcome,
    pub names: ArtifactNames,
    pub points: usize,
    /// Queued uploads that succeeded at the start of the cycle.
    pub retried_uploads: usize,
    pub heatmap_published: bool,
    pub listing_written: bool,
    pub listing_published: bool,
}

impl EmissionReport {
    fn new(outcome: EmissionOutcome, names: ArtifactNames, points: usize, retried: usize) -> Self {
        Self {
            outcome,
            names,
            points,
            retried_uploads: retried,
            heatmap_published: false,
            listing_written: false,
            listing_published: false,
        }
    }
}

pub struct PipelineController {
    sampler: FrameSampler,
    detector: Box<dyn Detector>,
    renderer: HeatmapRenderer,
    publisher: Box<dyn Publisher>,
    clock: Arc<dyn Clock>,
    targets: TargetClasses,
    confidence_threshold: f32,
    emission_threshold: usize,
    output_dir: PathBuf,
    shutdown_policy: ShutdownPolicy,
    buffer: PointBuffer,
    pending: PendingUploads,
    /// Names used by the last cycle that wrote artifacts.
    last_written: Option<ArtifactNames>,
    stats: PipelineStats,
    state: PipelineState,
}

impl PipelineController {
    /// Assemble a controller from already-opened collaborators.
    pub fn new(
        settings: &PipelineSettings,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        renderer: HeatmapRenderer,
        publisher: Box<dyn Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sampler = FrameSampler::new(source, Arc::clone(&clock), settings.frame_interval);
        Self {
            sampler,
            detector,
            renderer,
            publisher,
            clock,
            targets: settings.detector.target_classes.clone(),
            confidence_threshold: settings.confidence_threshold,
            emission_threshold: settings.emission_threshold.max(1),
            output_dir: settings.local_output_dir.clone(),
            shutdown_policy: settings.shutdown_policy,
            buffer: PointBuffer::with_capacity(settings.emission_threshold),
            pending: PendingUploads::new(settings.max_pending_uploads),
            last_written: None,
            stats: PipelineStats::default(),
            state: PipelineState::Idle,
        }
    }

    /// Open every collaborator named by `settings`. Any failure here is a
    /// setup error and aborts startup.
    pub fn open(settings: &PipelineSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        std::fs::create_dir_all(&settings.local_output_dir).with_context(|| {
            format!(
                "create output dir {}",
                settings.local_output_dir.display()
            )
        })?;
        let background = load_background(&settings.background_image_path)?;
        let renderer = HeatmapRenderer::new(background, settings.heatmap.clone())?;
        let detector = open_detector(&settings.model_path, &settings.detector)?;
        let source = open_source(&settings.stream_location)?;
        let publisher = open_publisher(&settings.storage)?;
        log::info!(
            "pipeline ready: stream={}, model={}, publisher={}, threshold={} points, interval={:?}",
            settings.stream_location,
            settings.model_path,
            publisher.name(),
            settings.emission_threshold,
            settings.frame_interval
        );
        Ok(Self::new(
            settings, source, detector, renderer, publisher, clock,
        ))
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn sampler_stats(&self) -> SamplerStats {
        self.sampler.stats()
    }

    pub fn buffered_points(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending_uploads(&self) -> &PendingUploads {
        &self.pending
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run until the source is exhausted or `shutdown` fires.
    ///
    /// Can be called once. The frame source is released before returning.
    pub fn run(&mut self, shutdown: &ShutdownSignal) -> Result<PipelineStats> {
        if self.state != PipelineState::Idle {
            return Err(anyhow!("pipeline already ran (state {:?})", self.state));
        }
        self.state = PipelineState::Running;
        log::info!(
            "starting heatmap pipeline on {} (emit every {} points)",
            self.sampler.location(),
            self.emission_threshold
        );

        loop {
            if shutdown.is_triggered() {
                self.state = PipelineState::Draining;
                break;
            }
            let Some(frame) = self.sampler.next(shutdown) else {
                if shutdown.is_triggered() {
                    self.state = PipelineState::Draining;
                }
                break;
            };
            let captured_at = self.clock.now();
            self.process_frame(&frame);
            drop(frame);

            if self.buffer.len() >= self.emission_threshold {
                self.emit_cycle(captured_at);
            }
            if self.stats.frames_processed % STATS_LOG_EVERY == 0 {
                self.log_stats();
            }
        }

        self.finish();
        Ok(self.stats)
    }

    fn process_frame(&mut self, frame: &Frame) {
        self.stats.frames_processed += 1;
        let detections =
            match self
                .detector
                .detect(frame, &self.targets, self.confidence_threshold)
            {
                Ok(detections) => detections,
                Err(e) => {
                    self.stats.detector_failures += 1;
                    log::warn!("detection failed on frame #{}: {:#}", frame.sequence, e);
                    return;
                }
            };

        self.stats.detections += detections.len() as u64;
        self.buffer
            .extend(detections.iter().map(|detection| detection.center()));
        log::info!(
            "frame #{}: {} vehicle(s) detected, {}/{} points buffered",
            frame.sequence,
            detections.len(),
            self.buffer.len(),
            self.emission_threshold
        );
    }

    /// Render, write and publish one artifact pair from the current buffer.
    ///
    /// The buffer is cleared only when the heatmap was rendered. Publish
    /// failures are queued for retry and do not keep points around.
    pub fn emit_cycle(&mut self, at: DateTime<Local>) -> EmissionReport {
        let retried = self.pending.retry(self.publisher.as_mut());
        let names = ArtifactNames::after(&at, self.last_written.as_ref());
        let points = self.buffer.len();

        let heatmap_path = names.heatmap_path(&self.output_dir);
        match self.renderer.render(self.buffer.snapshot(), Some(&heatmap_path)) {
            Ok(Emission::NoOp) => {
                return EmissionReport::new(EmissionOutcome::NoOp, names, points, retried);
            }
            Ok(Emission::Rendered { .. }) => {}
            Err(e) => {
                self.stats.render_failures += 1;
                log::error!("heatmap {} not rendered: {:#}", names.heatmap_file, e);
                return EmissionReport::new(EmissionOutcome::RenderFailed, names, points, retried);
            }
        }

        self.last_written = Some(names.clone());
        let mut report = EmissionReport::new(EmissionOutcome::Emitted, names, points, retried);
        report.heatmap_published = self.publish_or_queue(&heatmap_path, report.names.heatmap_key());

        let listing_path = report.names.listing_path(&self.output_dir);
        match write_point_listing(self.buffer.snapshot(), &listing_path) {
            Ok(()) => {
                report.listing_written = true;
                report.listing_published =
                    self.publish_or_queue(&listing_path, report.names.listing_key());
            }
            Err(e) => log::error!(
                "point listing {} not written: {:#}",
                report.names.listing_file,
                e
            ),
        }

        self.buffer.clear();
        self.stats.emissions += 1;
        log::info!(
            "emitted {} ({} points, heatmap published: {}, listing published: {})",
            report.names.timestamp,
            points,
            report.heatmap_published,
            report.listing_published
        );
        report
    }

    fn publish_or_queue(&mut self, local_path: &Path, key: String) -> bool {
        match self.publisher.publish(local_path, &key) {
            Ok(()) => true,
            Err(e) => {
                self.stats.publish_failures += 1;
                log::error!("upload of {} failed, queued for retry: {:#}", key, e);
                self.pending.push(PendingUpload {
                    local_path: local_path.to_path_buf(),
                    key,
                });
                false
            }
        }
    }

    fn finish(&mut self) {
        if !self.buffer.is_empty() {
            match self.shutdown_policy {
                ShutdownPolicy::Flush => {
                    log::info!("flushing {} buffered points before stop", self.buffer.len());
                    let now = self.clock.now();
                    self.emit_cycle(now);
                }
                ShutdownPolicy::Discard => {
                    log::info!("discarding {} buffered points", self.buffer.len());
                    self.buffer.clear();
                }
            }
        }
        if !self.pending.is_empty() {
            self.pending.retry(self.publisher.as_mut());
            if !self.pending.is_empty() {
                log::warn!(
                    "{} upload(s) still pending at shutdown; local copies kept in {}",
                    self.pending.len(),
                    self.output_dir.display()
                );
            }
        }
        self.sampler.release();
        self.state = PipelineState::Stopped;
        self.log_stats();
        log::info!("heatmap pipeline stopped");
    }

    fn log_stats(&self) {
        let sampler = self.sampler.stats();
        log::debug!(
            "stats: frames={} grab_failures={} detections={} emissions={} detector_failures={} render_failures={} publish_failures={} pending_uploads={} buffered={}",
            self.stats.frames_processed,
            sampler.transient_failures,
            self.stats.detections,
            self.stats.emissions,
            self.stats.detector_failures,
            self.stats.render_failures,
            self.stats.publish_failures,
            self.pending.len(),
            self.buffer.len()
        );
    }
}
