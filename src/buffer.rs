//! Point accumulation between emission cycles.

/// Center of a detection box, in source-frame pixels.
///
/// Coordinates are not checked against the frame bounds; whatever the detector
/// reports flows through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Insertion-ordered points collected until the emission threshold is reached.
///
/// `clear` is the only operation that removes points, so `len` never
/// decreases between two clears. The buffer is owned by the pipeline
/// controller and never shared.
#[derive(Debug, Default)]
pub struct PointBuffer {
    points: Vec<Point>,
}

impl PointBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn extend<I: IntoIterator<Item = Point>>(&mut self, points: I) {
        self.points.extend(points);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Current contents, oldest first. Does not mutate the buffer.
    pub fn snapshot(&self) -> &[Point] {
        &self.points
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
