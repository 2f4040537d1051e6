// Sources only deliver images; pacing and release-once come from the sampler.
use std::sync::Arc;
use std::time::Duration;

use heatmapper::{FrameRead, FrameSampler, FrameSource, ManualClock, ShutdownSignal};

struct Countdown(u32);

impl FrameSource for Countdown {
    fn location(&self) -> &str {
        "countdown://"
    }

    fn read_frame(&mut self) -> anyhow::Result<FrameRead> {
        if self.0 == 0 {
            return Ok(FrameRead::Exhausted);
        }
        self.0 -= 1;
        Ok(FrameRead::Image(image::RgbImage::new(4, 4)))
    }

    fn release(&mut self) {}
}

fn main() {
    let clock = Arc::new(ManualClock::at_local(2024, 1, 1, 0, 0, 0));
    let mut sampler = FrameSampler::new(Box::new(Countdown(2)), clock, Duration::from_secs(1));
    let shutdown = ShutdownSignal::new();
    let mut seen = 0;
    while let Some(frame) = sampler.next(&shutdown) {
        seen += 1;
        assert_eq!(frame.sequence, seen);
    }
    assert_eq!(seen, 2);
}
