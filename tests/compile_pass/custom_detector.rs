// A backend only supplies raw candidates; labels and thresholds come from the
// shared policy in `Detector::detect`.
use heatmapper::{BoundingBox, Candidate, Detector, Frame, TargetClasses};

struct CenterBox;

impl Detector for CenterBox {
    fn name(&self) -> &'static str {
        "center-box"
    }

    fn candidates(&mut self, frame: &Frame) -> anyhow::Result<Vec<Candidate>> {
        let (w, h) = (frame.width() as i32, frame.height() as i32);
        Ok(vec![
            Candidate {
                class_id: 3,
                confidence: 0.7,
                bbox: BoundingBox::new(w / 4, h / 4, w * 3 / 4, h * 3 / 4)?,
            },
            Candidate {
                class_id: 0,
                confidence: 0.99,
                bbox: BoundingBox::new(0, 0, 1, 1)?,
            },
        ])
    }
}

fn main() {
    let frame = Frame::new(image::RgbImage::new(40, 20), 1);
    let found = CenterBox
        .detect(&frame, &TargetClasses::vehicles(), 0.5)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].label(), "Motorcycle");
    assert_eq!((found[0].center().x, found[0].center().y), (20, 10));
}
