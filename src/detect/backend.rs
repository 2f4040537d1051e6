use anyhow::Result;

use crate::detect::result::{retain_targets, Candidate, Detection, TargetClasses};
use crate::frame::Frame;

/// Object detector.
///
/// Backends only implement `candidates`; the label and confidence policy lives
/// in the provided `detect` so every backend filters the same way. Label set
/// and threshold are passed on each call rather than stored in the backend.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference and return every box the model produced, in model order.
    fn candidates(&mut self, frame: &Frame) -> Result<Vec<Candidate>>;

    /// Detections in `frame` whose class is in `targets` with confidence at or
    /// above `confidence_threshold`. An empty vector means nothing was found.
    fn detect(
        &mut self,
        frame: &Frame,
        targets: &TargetClasses,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        let candidates = self.candidates(frame)?;
        let total = candidates.len();
        let detections = retain_targets(candidates, targets, confidence_threshold);
        log::debug!(
            "{}: frame #{} kept {}/{} candidates",
            self.name(),
            frame.sequence,
            detections.len(),
            total
        );
        Ok(detections)
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
