//! Turn raw backend observations into final detections.

use tracing::trace;
use vdet_models::{DetectedObject, DetectionConfiguration, ImageSize, UNKNOWN_LABEL};

use crate::backend::RawObservation;
use crate::coordinates::normalized_to_pixel;
use crate::nms::NmsProcessor;

/// Threshold, convert, suppress, cap.
#[derive(Debug, Clone, Copy)]
pub struct DetectionPostProcessor {
    config: DetectionConfiguration,
    nms: NmsProcessor,
}

impl DetectionPostProcessor {
    pub fn new(config: DetectionConfiguration) -> Self {
        Self {
            config,
            nms: NmsProcessor::new(config.iou_threshold()),
        }
    }

    pub fn config(&self) -> &DetectionConfiguration {
        &self.config
    }

    /// Filter and convert observations for an image of `image_size`.
    ///
    /// 1. drop observations below the confidence threshold (or non-finite)
    /// 2. map boxes into pixel space, label with the top classification
    /// 3. non-maximum suppression
    /// 4. keep at most `max_detections`
    pub fn process(
        &self,
        observations: Vec<RawObservation>,
        image_size: ImageSize,
    ) -> Vec<DetectedObject> {
        let threshold = self.config.confidence_threshold();
        let total = observations.len();

        let candidates: Vec<DetectedObject> = observations
            .into_iter()
            .filter(|obs| obs.confidence.is_finite() && obs.confidence >= threshold)
            .map(|obs| {
                let label = obs.top_label().unwrap_or(UNKNOWN_LABEL).to_string();
                DetectedObject::new(
                    label,
                    obs.confidence,
                    normalized_to_pixel(obs.bounding_box, image_size),
                )
            })
            .collect();
        let above_threshold = candidates.len();

        let mut kept = self.nms.apply(candidates);
        kept.truncate(self.config.max_detections());

        trace!(
            observations = total,
            above_threshold,
            kept = kept.len(),
            "Postprocessed observations"
        );

        kept
    }
}
