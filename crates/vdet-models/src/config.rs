//! Detection configuration.

use serde::Serialize;

use crate::rect::ImageSize;

/// Default minimum confidence for a detection to be kept.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Default IoU above which lower-confidence overlapping boxes are suppressed.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Default cap on the number of detections per image.
pub const DEFAULT_MAX_DETECTIONS: usize = 100;

/// Default model input edge length in pixels.
pub const DEFAULT_INPUT_EDGE: u32 = 640;

/// Immutable detection parameters shared by every pipeline stage.
///
/// All fields are range-checked once, in [`DetectionConfiguration::new`]:
/// thresholds are clamped into `[0, 1]` (NaN falls back to the default) and
/// `max_detections` is floored at 1. Components receive the value by copy and
/// never re-validate it.
///
/// Not `Deserialize`; build instances through [`DetectionConfiguration::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionConfiguration {
    confidence_threshold: f32,
    iou_threshold: f32,
    max_detections: usize,
    input_size: ImageSize,
}

impl DetectionConfiguration {
    /// Create a configuration, clamping every field into its valid range.
    pub fn new(
        confidence_threshold: f32,
        iou_threshold: f32,
        max_detections: i64,
        input_size: ImageSize,
    ) -> Self {
        Self {
            confidence_threshold: clamp_unit(confidence_threshold, DEFAULT_CONFIDENCE_THRESHOLD),
            iou_threshold: clamp_unit(iou_threshold, DEFAULT_IOU_THRESHOLD),
            max_detections: usize::try_from(max_detections.max(1)).unwrap_or(usize::MAX),
            input_size,
        }
    }

    /// Minimum confidence in `[0, 1]`.
    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Suppression IoU in `[0, 1]`.
    pub fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }

    /// Maximum number of objects per result, at least 1.
    pub fn max_detections(&self) -> usize {
        self.max_detections
    }

    /// Pixel size the model expects its input buffer in.
    pub fn input_size(&self) -> ImageSize {
        self.input_size
    }

    /// Copy with a different confidence threshold (re-clamped).
    pub fn with_confidence_threshold(self, threshold: f32) -> Self {
        Self::new(
            threshold,
            self.iou_threshold,
            self.max_detections as i64,
            self.input_size,
        )
    }

    /// Copy with a different IoU threshold (re-clamped).
    pub fn with_iou_threshold(self, threshold: f32) -> Self {
        Self::new(
            self.confidence_threshold,
            threshold,
            self.max_detections as i64,
            self.input_size,
        )
    }
}

impl Default for DetectionConfiguration {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
            input_size: ImageSize::square(DEFAULT_INPUT_EDGE),
        }
    }
}

fn clamp_unit(value: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 1.0)
    }
}
