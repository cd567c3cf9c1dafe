//! Video frame metadata and streaming progress.

use serde::Serialize;

use crate::detection::DetectionResult;

/// Position of a sampled frame within its source video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameMetadata {
    /// 0-based sampling step, increasing within one extraction run.
    pub frame_index: u64,
    /// Frame time in seconds.
    pub timestamp: f64,
    /// Total media duration in seconds.
    pub duration: f64,
}

/// One step of a streaming video detection run.
#[derive(Debug, Clone, Serialize)]
pub struct VideoDetectionProgress {
    /// Running 0-based index of emitted events.
    pub current_frame: u64,
    /// Estimated number of frames the run will produce.
    pub total_frames: u64,
    pub result: DetectionResult,
    pub metadata: FrameMetadata,
}

impl VideoDetectionProgress {
    /// Completed fraction in `[0, 1]`: `(current_frame + 1) / total_frames`.
    ///
    /// Returns 0 when the total is unknown (0).
    pub fn percentage(&self) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        ((self.current_frame + 1) as f64 / self.total_frames as f64).min(1.0)
    }

    /// True for the event that completes the estimated total.
    pub fn is_last(&self) -> bool {
        self.current_frame + 1 >= self.total_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rect::ImageSize;
    use std::time::Duration;

    fn progress(current_frame: u64, total_frames: u64) -> VideoDetectionProgress {
        VideoDetectionProgress {
            current_frame,
            total_frames,
            result: DetectionResult::new(vec![], ImageSize::new(1, 1), Duration::ZERO),
            metadata: FrameMetadata {
                frame_index: current_frame,
                timestamp: current_frame as f64,
                duration: total_frames as f64,
            },
        }
    }

    #[test]
    fn test_percentage() {
        assert!((progress(0, 4).percentage() - 0.25).abs() < 1e-12);
        assert!((progress(3, 4).percentage() - 1.0).abs() < 1e-12);
        assert!(progress(3, 4).is_last());
        assert!(!progress(2, 4).is_last());
    }

    #[test]
    fn test_percentage_clamped() {
        assert_eq!(progress(9, 4).percentage(), 1.0);
        assert_eq!(progress(0, 0).percentage(), 0.0);
    }
}
