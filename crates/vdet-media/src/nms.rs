//! Greedy non-maximum suppression.

use vdet_models::DetectedObject;

/// Removes lower-confidence detections that overlap a kept one.
#[derive(Debug, Clone, Copy)]
pub struct NmsProcessor {
    iou_threshold: f32,
}

impl NmsProcessor {
    pub fn new(iou_threshold: f32) -> Self {
        Self { iou_threshold }
    }

    pub fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }

    /// Run suppression over `candidates`.
    ///
    /// The result is ordered by descending confidence. Candidates with equal
    /// confidence keep their input order (stable sort). Suppression is
    /// class-agnostic: a candidate is discarded when its IoU with an already
    /// kept detection is `>= iou_threshold`.
    pub fn apply(&self, candidates: Vec<DetectedObject>) -> Vec<DetectedObject> {
        non_maximum_suppression(candidates, self.iou_threshold)
    }
}

/// Greedy NMS; see [`NmsProcessor::apply`]. O(n²) in the candidate count.
pub fn non_maximum_suppression(
    mut candidates: Vec<DetectedObject>,
    iou_threshold: f32,
) -> Vec<DetectedObject> {
    if candidates.is_empty() {
        return candidates;
    }

    // Sort by confidence (descending); `sort_by` is stable.
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let threshold = iou_threshold as f64;
    let mut keep: Vec<DetectedObject> = Vec::new();
    let mut suppressed = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }

        for j in (i + 1)..candidates.len() {
            if !suppressed[j] && candidates[i].iou(&candidates[j]) >= threshold {
                suppressed[j] = true;
            }
        }

        keep.push(candidates[i].clone());
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdet_models::PixelRect;

    fn det(confidence: f32, x: f64, y: f64, w: f64, h: f64) -> DetectedObject {
        DetectedObject::new("object", confidence, PixelRect::new(x, y, w, h))
    }

    fn confidences(objects: &[DetectedObject]) -> Vec<f32> {
        objects.iter().map(|o| o.confidence).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(non_maximum_suppression(Vec::new(), 0.5).is_empty());
    }

    #[test]
    fn test_identical_boxes_keep_highest() {
        let out = NmsProcessor::new(0.5).apply(vec![
            det(0.6, 10.0, 10.0, 50.0, 50.0),
            det(0.9, 10.0, 10.0, 50.0, 50.0),
        ]);
        assert_eq!(confidences(&out), vec![0.9]);
    }

    #[test]
    fn test_disjoint_boxes_all_survive_sorted() {
        let out = NmsProcessor::new(0.5).apply(vec![
            det(0.3, 0.0, 0.0, 10.0, 10.0),
            det(0.8, 100.0, 0.0, 10.0, 10.0),
            det(0.5, 200.0, 0.0, 10.0, 10.0),
        ]);
        assert_eq!(confidences(&out), vec![0.8, 0.5, 0.3]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // IoU of these two is exactly 1/3.
        let a = det(0.9, 0.0, 0.0, 20.0, 10.0);
        let b = det(0.8, 10.0, 0.0, 20.0, 10.0);
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-12);

        let out = non_maximum_suppression(vec![a.clone(), b.clone()], (1.0f64 / 3.0) as f32 - 1e-6);
        assert_eq!(out.len(), 1);
        let out = non_maximum_suppression(vec![a, b], 0.34);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_equal_confidence_keeps_input_order() {
        let first = det(0.7, 0.0, 0.0, 10.0, 10.0);
        let second = det(0.7, 1.0, 1.0, 10.0, 10.0);
        let first_id = first.id;
        let out = non_maximum_suppression(vec![first, second], 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, first_id);
    }

    #[test]
    fn test_chain_suppression_is_greedy() {
        // a overlaps b, b overlaps c, a does not overlap c.
        let a = det(0.9, 0.0, 0.0, 10.0, 10.0);
        let b = det(0.8, 5.0, 0.0, 10.0, 10.0);
        let c = det(0.7, 10.0, 0.0, 10.0, 10.0);
        let out = non_maximum_suppression(vec![c, b, a], 0.3);
        // b is removed by a; c survives since b no longer suppresses.
        assert_eq!(confidences(&out), vec![0.9, 0.7]);
    }

    #[test]
    fn test_properties_on_generated_input() {
        // Deterministic pseudo-random boxes.
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % 10_000) as f64 / 10_000.0
        };

        for &threshold in &[0.1f32, 0.3, 0.5, 0.7, 0.9] {
            let input: Vec<DetectedObject> = (0..60)
                .map(|_| {
                    det(
                        next() as f32,
                        next() * 200.0,
                        next() * 200.0,
                        5.0 + next() * 60.0,
                        5.0 + next() * 60.0,
                    )
                })
                .collect();
            let best = input
                .iter()
                .map(|d| d.confidence)
                .fold(f32::MIN, f32::max);

            let out = non_maximum_suppression(input.clone(), threshold);

            // Subset of the input.
            assert!(out.iter().all(|o| input.iter().any(|i| i.id == o.id)));
            // Highest confidence always kept.
            assert_eq!(out[0].confidence, best);
            // No surviving pair overlaps at or above the threshold.
            for (i, a) in out.iter().enumerate() {
                for b in &out[i + 1..] {
                    assert!(a.iou(b) < threshold as f64);
                }
            }
        }
    }
}
