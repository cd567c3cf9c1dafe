//! Detection results.

use serde::Serialize;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use uuid::Uuid;

use crate::rect::{ImageSize, PixelRect, Point};

/// Label used when the backend supplies no classification for a box.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// A single detected object in pixel space.
///
/// Each detection event creates a fresh value with a new `id`; there is no
/// identity carried across frames. Equality compares label, confidence and
/// box and ignores `id`.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedObject {
    /// Opaque unique identifier.
    pub id: Uuid,
    pub label: String,
    /// Confidence score, produced in `[0, 1]` by the pipeline.
    pub confidence: f32,
    /// Bounding box in pixels, origin top-left.
    pub bounding_box: PixelRect,
}

impl DetectedObject {
    /// Create a detection with a fresh id.
    pub fn new(label: impl Into<String>, confidence: f32, bounding_box: PixelRect) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            confidence,
            bounding_box,
        }
    }

    pub fn center(&self) -> Point {
        self.bounding_box.center()
    }

    pub fn area(&self) -> f64 {
        self.bounding_box.area()
    }

    /// Width divided by height, or 0 when the box has no height.
    pub fn aspect_ratio(&self) -> f64 {
        if self.bounding_box.height == 0.0 {
            0.0
        } else {
            self.bounding_box.width / self.bounding_box.height
        }
    }

    /// Confidence formatted as a percentage, e.g. `"87.5%"`.
    pub fn confidence_percentage(&self) -> String {
        format!("{:.1}%", self.confidence * 100.0)
    }

    /// Intersection over Union with another detection's box.
    pub fn iou(&self, other: &DetectedObject) -> f64 {
        self.bounding_box.iou(&other.bounding_box)
    }
}

impl PartialEq for DetectedObject {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.confidence == other.confidence
            && self.bounding_box == other.bounding_box
    }
}

/// Outcome of running the pipeline on one image or video frame.
///
/// Equality and hashing use `id` only.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub id: Uuid,
    /// Objects in pipeline output order (NMS selection order).
    pub objects: Vec<DetectedObject>,
    /// Size of the source image the boxes refer to.
    pub image_size: ImageSize,
    /// Wall-clock time spent in the pipeline.
    pub processing_time: Duration,
    /// Frame timestamp in seconds; 0 for standalone images.
    pub frame_timestamp: f64,
}

impl DetectionResult {
    pub fn new(objects: Vec<DetectedObject>, image_size: ImageSize, processing_time: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            objects,
            image_size,
            processing_time,
            frame_timestamp: 0.0,
        }
    }

    /// Attach the timestamp of the video frame this result belongs to.
    pub fn with_frame_timestamp(mut self, timestamp: f64) -> Self {
        self.frame_timestamp = timestamp;
        self
    }

    pub fn count(&self) -> usize {
        self.objects.len()
    }

    pub fn has_detections(&self) -> bool {
        !self.objects.is_empty()
    }

    /// Distinct labels in lexicographic order.
    pub fn unique_labels(&self) -> Vec<String> {
        self.objects
            .iter()
            .map(|o| o.label.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    /// Processing time for display: `"12.3 ms"` below one second, `"1.23 s"` above.
    pub fn formatted_duration(&self) -> String {
        let secs = self.processing_time.as_secs_f64();
        if secs < 1.0 {
            format!("{:.1} ms", secs * 1000.0)
        } else {
            format!("{:.2} s", secs)
        }
    }
}

impl PartialEq for DetectionResult {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DetectionResult {}

impl Hash for DetectionResult {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(label: &str, confidence: f32) -> DetectedObject {
        DetectedObject::new(label, confidence, PixelRect::new(0.0, 0.0, 40.0, 20.0))
    }

    #[test]
    fn test_derived_geometry() {
        let obj = object("person", 0.875);
        assert_eq!(obj.area(), 800.0);
        assert_eq!(obj.aspect_ratio(), 2.0);
        assert_eq!(obj.center(), Point { x: 20.0, y: 10.0 });
        assert_eq!(obj.confidence_percentage(), "87.5%");
    }

    #[test]
    fn test_aspect_ratio_zero_height() {
        let obj = DetectedObject::new("car", 0.5, PixelRect::new(0.0, 0.0, 10.0, 0.0));
        assert_eq!(obj.aspect_ratio(), 0.0);
    }

    #[test]
    fn test_object_equality_ignores_id() {
        let a = object("dog", 0.7);
        let b = object("dog", 0.7);
        assert_ne!(a.id, b.id);
        assert_eq!(a, b);
        assert_ne!(a, object("cat", 0.7));
    }

    #[test]
    fn test_unique_labels_sorted() {
        let result = DetectionResult::new(
            vec![object("person", 0.9), object("car", 0.8), object("person", 0.6)],
            ImageSize::new(100, 100),
            Duration::from_millis(5),
        );
        assert_eq!(result.count(), 3);
        assert!(result.has_detections());
        assert_eq!(result.unique_labels(), vec!["car".to_string(), "person".to_string()]);
    }

    #[test]
    fn test_result_identity() {
        let a = DetectionResult::new(vec![], ImageSize::new(1, 1), Duration::ZERO);
        let b = DetectionResult::new(vec![], ImageSize::new(1, 1), Duration::ZERO);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert!(!a.has_detections());
        assert_eq!(a.frame_timestamp, 0.0);
    }

    #[test]
    fn test_formatted_duration() {
        let fast = DetectionResult::new(vec![], ImageSize::new(1, 1), Duration::from_micros(12_345));
        assert_eq!(fast.formatted_duration(), "12.3 ms");
        let slow = DetectionResult::new(vec![], ImageSize::new(1, 1), Duration::from_millis(1_234));
        assert_eq!(slow.formatted_duration(), "1.23 s");
    }

    #[test]
    fn test_serializes_to_json() {
        let result = DetectionResult::new(
            vec![object("person", 0.9)],
            ImageSize::new(640, 480),
            Duration::from_millis(3),
        )
        .with_frame_timestamp(1.5);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["frame_timestamp"], 1.5);
        assert_eq!(json["image_size"]["width"], 640);
        assert_eq!(json["objects"][0]["label"], "person");
    }
}
