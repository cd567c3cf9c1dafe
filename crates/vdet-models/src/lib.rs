//! Shared data models for the vdet detection pipeline.
//!
//! This crate provides Serde-serializable value types for:
//! - Detection configuration (thresholds, result cap, model input size)
//! - Rectangles in normalized (backend) and pixel (caller) space
//! - Per-image detection results and the objects they contain
//! - Video frame metadata and streaming progress events

pub mod config;
pub mod detection;
pub mod rect;
pub mod video;

// Re-export common types
pub use config::{
    DetectionConfiguration, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_INPUT_EDGE, DEFAULT_IOU_THRESHOLD,
    DEFAULT_MAX_DETECTIONS,
};
pub use detection::{DetectedObject, DetectionResult, UNKNOWN_LABEL};
pub use rect::{ImageSize, NormalizedRect, PixelRect, Point};
pub use video::{FrameMetadata, VideoDetectionProgress};
