use serde::Serialize;

/// Pixel dimensions of an image or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    /// Create a new size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Square size with the given edge length.
    pub const fn square(edge: u32) -> Self {
        Self::new(edge, edge)
    }

    /// Number of pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Largest size with this aspect ratio that fits inside `bounds`.
    ///
    /// Never upscales; each dimension is at least 1 pixel.
    pub fn fit_within(&self, bounds: ImageSize) -> ImageSize {
        if self.is_empty() || (self.width <= bounds.width && self.height <= bounds.height) {
            return *self;
        }
        let scale = (bounds.width as f64 / self.width as f64)
            .min(bounds.height as f64 / self.height as f64);
        ImageSize::new(
            ((self.width as f64 * scale).round() as u32).max(1),
            ((self.height as f64 * scale).round() as u32).max(1),
        )
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A point in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A normalized rectangle (0.0 to 1.0) as produced by inference backends.
///
/// The origin is the **bottom-left** corner of the image: `y = 0` is the
/// bottom edge and `y` grows upwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedRect {
    /// X coordinate of the left edge (0.0 = left, 1.0 = right)
    pub x: f64,
    /// Y coordinate of the bottom edge (0.0 = bottom, 1.0 = top)
    pub y: f64,
    /// Width of the rectangle (0.0 to 1.0)
    pub width: f64,
    /// Height of the rectangle (0.0 to 1.0)
    pub height: f64,
}

impl NormalizedRect {
    /// Create a new normalized rectangle.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// A rectangle in pixel units with a **top-left** origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn min_x(&self) -> f64 {
        self.x.min(self.x + self.width)
    }

    pub fn min_y(&self) -> f64 {
        self.y.min(self.y + self.height)
    }

    pub fn max_x(&self) -> f64 {
        self.x.max(self.x + self.width)
    }

    pub fn max_y(&self) -> f64 {
        self.y.max(self.y + self.height)
    }

    /// Area in square pixels (always non-negative).
    pub fn area(&self) -> f64 {
        (self.width * self.height).abs()
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    /// Overlapping region, or `None` when the rectangles do not intersect.
    pub fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        let x1 = self.min_x().max(other.min_x());
        let y1 = self.min_y().max(other.min_y());
        let x2 = self.max_x().min(other.max_x());
        let y2 = self.max_y().min(other.max_y());

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(PixelRect::new(x1, y1, x2 - x1, y2 - y1))
    }

    /// Intersection over Union.
    ///
    /// Returns 0 for disjoint rectangles and when the union area is 0.
    pub fn iou(&self, other: &PixelRect) -> f64 {
        let intersection = self.intersection(other).map_or(0.0, |r| r.area());
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}
