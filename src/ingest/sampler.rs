use std::sync::Arc;
use std::time::Duration;

use super::{FrameRead, FrameSource};
use crate::clock::{Clock, ShutdownSignal};
use crate::frame::Frame;

/// Counters for a sampler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub frames_delivered: u64,
    pub transient_failures: u64,
}

/// Paced, pull-based view of a frame source.
///
/// The sequence is lazy and cannot be restarted. A failed read is logged and
/// retried after the next pause; only exhaustion or shutdown ends it. The
/// source is released exactly once, by `release` or on drop.
pub struct FrameSampler {
    source: Box<dyn FrameSource>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    stats: SamplerStats,
    started: bool,
    exhausted: bool,
    released: bool,
}

impl FrameSampler {
    pub fn new(source: Box<dyn FrameSource>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            source,
            clock,
            interval,
            stats: SamplerStats::default(),
            started: false,
            exhausted: false,
            released: false,
        }
    }

    /// Next frame, or `None` once the source is exhausted, released, or
    /// `shutdown` has fired.
    ///
    /// Every fetch except the first is preceded by a pause of `interval`.
    pub fn next(&mut self, shutdown: &ShutdownSignal) -> Option<Frame> {
        if self.exhausted || self.released {
            return None;
        }
        loop {
            if self.started {
                self.clock.pause(self.interval, shutdown);
            }
            self.started = true;
            if shutdown.is_triggered() {
                return None;
            }

            match self.source.read_frame() {
                Ok(FrameRead::Image(image)) => {
                    self.stats.frames_delivered += 1;
                    return Some(Frame::new(image, self.stats.frames_delivered));
                }
                Ok(FrameRead::Exhausted) => {
                    log::info!(
                        "frame source {} exhausted after {} frames",
                        self.source.location(),
                        self.stats.frames_delivered
                    );
                    self.exhausted = true;
                    return None;
                }
                Err(e) => {
                    self.stats.transient_failures += 1;
                    log::warn!(
                        "failed to grab frame from {}: {:#}",
                        self.source.location(),
                        e
                    );
                }
            }
        }
    }

    /// Release the underlying source. Further calls are no-ops.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.source.release();
        log::info!("frame source {} released", self.source.location());
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    pub fn location(&self) -> &str {
        self.source.location()
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.release();
    }
}
