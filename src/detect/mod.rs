//! Vehicle detection.
//!
//! - `Detector`: backend trait plus the shared label/confidence policy
//! - `Detection`, `BoundingBox`: validated detection records
//! - `open_detector`: picks a backend from the configured model path

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::Detector;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{open_detector, DetectorSettings};
pub use result::{retain_targets, BoundingBox, Candidate, Detection, TargetClasses};
