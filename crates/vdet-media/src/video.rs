//! Streaming object detection over video files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::{info, info_span, warn, Instrument};
use vdet_models::VideoDetectionProgress;

use crate::error::{DetectionError, ExtractionError};
use crate::extractor::VideoFrameExtractor;
use crate::service::DetectionService;
use crate::stream::{CancellableStream, StreamSender};

/// Stream of per-frame detection progress.
pub type ProgressStream = CancellableStream<VideoDetectionProgress, DetectionError>;

/// Runs a [`DetectionService`] over frames sampled by a
/// [`VideoFrameExtractor`].
#[derive(Clone)]
pub struct VideoDetectionService {
    detector: Arc<DetectionService>,
    extractor: VideoFrameExtractor,
}

impl VideoDetectionService {
    pub fn new(detector: DetectionService, extractor: VideoFrameExtractor) -> Self {
        Self {
            detector: Arc::new(detector),
            extractor,
        }
    }

    pub fn detector(&self) -> &DetectionService {
        &self.detector
    }

    pub fn extractor(&self) -> &VideoFrameExtractor {
        &self.extractor
    }

    /// Detect objects in frames of `path` sampled at `fps` (1 fps when `None`).
    ///
    /// Each item carries one frame's result. The stream ends after the last
    /// frame or after the first error; cancelling it stops frame extraction.
    pub fn detect(&self, path: impl Into<PathBuf>, fps: Option<f64>) -> ProgressStream {
        let this = self.clone();
        let path = path.into();
        let span = info_span!("video_detect", path = %path.display());

        CancellableStream::spawn(1, move |tx| async move { this.produce(path, fps, tx).await }.instrument(span))
    }

    async fn produce(
        &self,
        path: PathBuf,
        fps: Option<f64>,
        tx: StreamSender<VideoDetectionProgress, DetectionError>,
    ) {
        let started = Instant::now();
        let plan = match self.extractor.prepare(&path, fps).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "Video detection could not start");
                tx.fail(e.into()).await;
                return;
            }
        };
        let total_frames = plan.frame_count();
        let mut frames = self.extractor.extract_planned(&path, plan);
        let mut current_frame = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = tx.signal().cancelled() => {
                    tx.finish_cancelled();
                    return;
                }
                next = frames.next() => next,
            };

            let frame = match next {
                None => break,
                Some(Ok(frame)) => frame,
                Some(Err(ExtractionError::Cancelled)) => {
                    tx.finish_cancelled();
                    return;
                }
                Some(Err(e)) => {
                    tx.fail(e.into()).await;
                    return;
                }
            };

            let result = match self.detector.detect_cancellable(&frame.image, tx.signal()).await {
                Ok(result) => result.with_frame_timestamp(frame.metadata.timestamp),
                Err(DetectionError::Cancelled) => {
                    tx.finish_cancelled();
                    return;
                }
                Err(e) => {
                    warn!(frame = frame.metadata.frame_index, error = %e, "Frame detection failed");
                    tx.fail(e).await;
                    return;
                }
            };

            let progress = VideoDetectionProgress {
                current_frame,
                total_frames,
                result,
                metadata: frame.metadata,
            };
            if !tx.send(progress).await {
                return;
            }
            current_frame += 1;
        }

        info!(
            frames = current_frame,
            planned = total_frames,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Video detection completed"
        );
    }
}
