//! Vehicle density heatmaps from live video.
//!
//! This crate samples frames from a camera stream, detects vehicles in each
//! frame, accumulates the detection centers, and periodically renders a
//! density heatmap over a fixed background image. Each heatmap is published
//! together with a CSV listing of the points it was drawn from.
//!
//! # Architecture
//!
//! ```text
//! FrameSource ─▶ FrameSampler ─▶ Detector ─▶ PointBuffer ─▶ HeatmapRenderer ─▶ Publisher
//!                      ▲                                         │
//!                      └──────────── PipelineController ─────────┘
//! ```
//!
//! The controller is a single-threaded state machine
//! (`Idle → Running → Draining → Stopped`). The only place it waits is the
//! inter-frame pause, which goes through an injected `Clock` and returns early
//! once the `ShutdownSignal` fires.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (synthetic, MJPEG over HTTP, FFmpeg) and the paced sampler
//! - `detect`: detector trait, validated detections, stub and ONNX backends
//! - `buffer`: point accumulation between emissions
//! - `heatmap`: KDE overlay rendering
//! - `artifact`: artifact names and the point listing
//! - `publish`: local and GCS publishers, retry queue
//! - `pipeline`: the control loop
//! - `config`, `clock`, `error`: settings, time and shutdown, error taxonomy

pub mod artifact;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod heatmap;
pub mod ingest;
pub mod pipeline;
pub mod publish;

pub use artifact::{write_point_listing, ArtifactNames};
pub use buffer::{Point, PointBuffer};
pub use clock::{Clock, ManualClock, ShutdownSignal, SystemClock};
pub use config::{PipelineSettings, ShutdownPolicy, StorageBackend, StorageSettings};
pub use detect::{
    open_detector, BoundingBox, Candidate, Detection, Detector, DetectorSettings, TargetClasses,
};
pub use error::HeatmapError;
pub use frame::Frame;
pub use heatmap::{load_background, Colormap, Emission, HeatmapOptions, HeatmapRenderer};
pub use ingest::{open_source, FrameRead, FrameSampler, FrameSource, SamplerStats};
pub use pipeline::{
    EmissionOutcome, EmissionReport, PipelineController, PipelineState, PipelineStats,
};
pub use publish::{
    default_extension, latest_first, open_publisher, with_extension, LocalPublisher,
    PendingUploads, Publisher,
};
