use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Candidate};
use crate::frame::Frame;

/// Class ids cycled through by the stub, all COCO vehicles.
const STUB_CLASSES: [u32; 4] = [2, 3, 5, 7];

/// Deterministic detector for dry runs (`stub://` model paths).
///
/// Emits one vehicle per frame travelling left to right along a lane in the
/// lower half of the image, plus a second slower one every third frame.
#[derive(Debug, Default)]
pub struct StubBackend {
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Detector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn candidates(&mut self, frame: &Frame) -> Result<Vec<Candidate>> {
        self.calls += 1;
        let width = frame.width() as i32;
        let height = frame.height() as i32;
        if width < 8 || height < 8 {
            return Ok(Vec::new());
        }

        let box_w = (width / 8).max(2);
        let box_h = (height / 8).max(2);
        let lane_y = height * 5 / 8;
        let step = frame.sequence as i64;
        let lane = |divisor: i64| ((step * box_w as i64 / divisor) % (width - box_w) as i64) as i32;

        let mut out = Vec::with_capacity(2);
        let x = lane(2);
        out.push(Candidate {
            class_id: STUB_CLASSES[(frame.sequence % 4) as usize],
            confidence: 0.8,
            bbox: BoundingBox::new(x, lane_y, x + box_w, lane_y + box_h)?,
        });

        if frame.sequence % 3 == 0 {
            let x = lane(6);
            let y = lane_y - box_h * 2;
            out.push(Candidate {
                class_id: 7,
                confidence: 0.55,
                bbox: BoundingBox::new(x, y, x + box_w, y + box_h)?,
            });
        }
        Ok(out)
    }
}
