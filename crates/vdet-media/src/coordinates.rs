//! Conversion between backend (normalized, bottom-left origin) and pixel
//! (top-left origin) coordinate spaces.
//!
//! The only non-trivial part is the y flip: a normalized box whose bottom edge
//! sits at `y` with height `h` has its top edge at `1 - y - h` when measured
//! from the top.

use vdet_models::{ImageSize, NormalizedRect, PixelRect};

/// Map a normalized bottom-left-origin box into pixel space.
///
/// `x' = x·W`, `y' = (1 − y − h)·H`, `w' = w·W`, `h' = h·H`.
/// Inputs outside `[0, 1]` are not validated and pass through arithmetically.
pub fn normalized_to_pixel(rect: NormalizedRect, image_size: ImageSize) -> PixelRect {
    let w = image_size.width as f64;
    let h = image_size.height as f64;

    PixelRect {
        x: rect.x * w,
        y: (1.0 - rect.y - rect.height) * h,
        width: rect.width * w,
        height: rect.height * h,
    }
}

/// Inverse of [`normalized_to_pixel`].
///
/// Returns a zero rectangle for an empty image size.
pub fn pixel_to_normalized(rect: PixelRect, image_size: ImageSize) -> NormalizedRect {
    if image_size.is_empty() {
        return NormalizedRect::new(0.0, 0.0, 0.0, 0.0);
    }
    let w = image_size.width as f64;
    let h = image_size.height as f64;
    let height = rect.height / h;

    NormalizedRect {
        x: rect.x / w,
        y: 1.0 - rect.y / h - height,
        width: rect.width / w,
        height,
    }
}
