//! Detection pipeline metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! binary installs a recorder.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const DETECTIONS_TOTAL: &str = "vdet_detections_total";
    pub const DETECTION_DURATION_SECONDS: &str = "vdet_detection_duration_seconds";
    pub const OBJECTS_DETECTED_TOTAL: &str = "vdet_objects_detected_total";
    pub const FRAMES_EXTRACTED_TOTAL: &str = "vdet_frames_extracted_total";
    pub const DETECTION_FAILURES_TOTAL: &str = "vdet_detection_failures_total";
}

/// Record a successful detection call.
pub fn record_detection(backend: &str, objects: usize, duration_secs: f64) {
    let labels = [("backend", backend.to_string())];
    counter!(names::DETECTIONS_TOTAL, &labels).increment(1);
    counter!(names::OBJECTS_DETECTED_TOTAL, &labels).increment(objects as u64);
    histogram!(names::DETECTION_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a failed or cancelled detection call.
pub fn record_detection_failure(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::DETECTION_FAILURES_TOTAL, &labels).increment(1);
}

/// Record a frame delivered by the extractor.
pub fn record_frame_extracted(source: &str) {
    let labels = [("source", source.to_string())];
    counter!(names::FRAMES_EXTRACTED_TOTAL, &labels).increment(1);
}
