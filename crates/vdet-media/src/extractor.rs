//! Timed frame sampling from video files.
//!
//! [`VideoFrameExtractor`] walks a [`SamplingPlan`] and decodes one frame per
//! timestamp through a [`FrameSource`]. Frames are delivered through a
//! [`FrameStream`] with a small read-ahead buffer; the producer stops as soon
//! as the stream is cancelled or dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, Rgb};
use tracing::{debug, info, warn};
use vdet_models::{FrameMetadata, ImageSize};

use crate::command::FrameGrabCommand;
use crate::error::ExtractionError;
use crate::metrics;
use crate::probe::{probe_media, MediaInfo};
use crate::stream::{CancellableStream, StreamSender};

/// Sampling interval when no rate is requested.
pub const DEFAULT_SAMPLE_INTERVAL: f64 = 1.0;

/// Upper bound on the frames a single plan may schedule.
pub const MAX_PLANNED_FRAMES: u64 = 10_000_000;

/// Frames buffered ahead of the consumer.
pub const DEFAULT_FRAME_BUFFER: usize = 1;

/// Stream of decoded frames.
pub type FrameStream = CancellableStream<VideoFrame, ExtractionError>;

/// Decodes frames at arbitrary timestamps.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Source name for logging and metrics.
    fn name(&self) -> &str;

    /// Read duration and dimensions. Missing files are `InvalidVideoUrl`.
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ExtractionError>;

    /// Decode the frame at `time` seconds, scaled to `size`.
    async fn frame_at(
        &self,
        path: &Path,
        time: f64,
        size: ImageSize,
    ) -> Result<DynamicImage, ExtractionError>;
}

/// [`FrameSource`] backed by the `ffprobe` and `ffmpeg` binaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegFrameSource;

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, ExtractionError> {
        probe_media(path).await
    }

    async fn frame_at(
        &self,
        path: &Path,
        time: f64,
        size: ImageSize,
    ) -> Result<DynamicImage, ExtractionError> {
        let grab = FrameGrabCommand::new(path, time, size);
        let bytes = match grab.run().await? {
            Some(bytes) => bytes,
            None => {
                // Sample times can fall after the last frame's timestamp.
                let info = probe_media(path).await?;
                if !info.is_near_end(time) {
                    return Err(ExtractionError::frame_generation_failed(time, "no frame decoded"));
                }
                debug!(time, duration = info.duration, "Seek past last frame, using final frame");
                grab.last_frame().run().await?.ok_or_else(|| {
                    ExtractionError::frame_generation_failed(time, "no final frame decoded")
                })?
            }
        };
        let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_raw(size.width, size.height, bytes).ok_or_else(|| {
                ExtractionError::frame_generation_failed(time, "decoded frame has wrong size")
            })?;
        Ok(DynamicImage::ImageRgb8(buffer))
    }
}

/// Which timestamps to sample from a video.
///
/// `frame_count` is the number of `k >= 0` with `k * interval < duration`,
/// and frame `k` is taken at `k * interval`. Progress estimates and the
/// extraction loop both read this value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPlan {
    duration: f64,
    interval: f64,
    frame_count: u64,
    frame_size: ImageSize,
}

impl SamplingPlan {
    /// Plan sampling at `fps` frames per second (one per second when `None`).
    pub fn new(duration: f64, fps: Option<f64>) -> Result<Self, ExtractionError> {
        let interval = sample_interval(fps)?;
        if !duration.is_finite() || duration < 0.0 {
            return Err(ExtractionError::AssetLoadingFailed(format!(
                "Invalid media duration: {}",
                duration
            )));
        }

        if duration / interval > MAX_PLANNED_FRAMES as f64 {
            return Err(ExtractionError::AssetLoadingFailed(format!(
                "Sampling {}s every {}s exceeds {} frames",
                duration, interval, MAX_PLANNED_FRAMES
            )));
        }

        Ok(Self {
            duration,
            interval,
            frame_count: count_samples(duration, interval),
            frame_size: ImageSize::new(0, 0),
        })
    }

    /// Set the size frames are decoded at.
    pub fn with_frame_size(mut self, size: ImageSize) -> Self {
        self.frame_size = size;
        self
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frame_size(&self) -> ImageSize {
        self.frame_size
    }

    /// Timestamp of sample `k`.
    pub fn timestamp(&self, k: u64) -> f64 {
        k as f64 * self.interval
    }

    pub fn timestamps(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.frame_count).map(move |k| self.timestamp(k))
    }
}

/// Number of frames sampled from `duration` seconds at `fps`.
///
/// Returns 0 for invalid input.
pub fn estimate_frame_count(duration: f64, fps: Option<f64>) -> u64 {
    SamplingPlan::new(duration, fps)
        .map(|plan| plan.frame_count())
        .unwrap_or(0)
}

fn sample_interval(fps: Option<f64>) -> Result<f64, ExtractionError> {
    match fps {
        None => Ok(DEFAULT_SAMPLE_INTERVAL),
        Some(fps) if fps.is_finite() && fps > 0.0 => Ok(1.0 / fps),
        Some(fps) => Err(ExtractionError::InvalidFrameRate(fps)),
    }
}

fn count_samples(duration: f64, interval: f64) -> u64 {
    if duration <= 0.0 {
        return 0;
    }
    let mut n = (duration / interval).ceil() as u64;
    // Correct for rounding in the division so that n is exactly
    // the count of k with k * interval < duration.
    while n > 0 && (n - 1) as f64 * interval >= duration {
        n -= 1;
    }
    while n < u64::MAX && (n as f64) * interval < duration {
        n = n.saturating_add(1);
    }
    n
}

/// A decoded frame with its position in the source.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: DynamicImage,
    pub metadata: FrameMetadata,
}

impl VideoFrame {
    pub fn timestamp(&self) -> f64 {
        self.metadata.timestamp
    }
}

/// What to do when a single frame fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameFailurePolicy {
    /// Emit the error and end the stream.
    #[default]
    Abort,
    /// Log a warning and continue with the next timestamp.
    Skip,
}

/// Samples frames from video files at a fixed rate.
#[derive(Clone)]
pub struct VideoFrameExtractor {
    source: Arc<dyn FrameSource>,
    max_resolution: Option<ImageSize>,
    failure_policy: FrameFailurePolicy,
    buffer: usize,
}

impl Default for VideoFrameExtractor {
    fn default() -> Self {
        Self::new(Arc::new(FfmpegFrameSource))
    }
}

impl VideoFrameExtractor {
    pub fn new(source: Arc<dyn FrameSource>) -> Self {
        Self {
            source,
            max_resolution: None,
            failure_policy: FrameFailurePolicy::default(),
            buffer: DEFAULT_FRAME_BUFFER,
        }
    }

    /// Downscale frames (aspect-fit) so they fit within `max`.
    pub fn with_max_resolution(mut self, max: ImageSize) -> Self {
        self.max_resolution = Some(max);
        self
    }

    pub fn with_failure_policy(mut self, policy: FrameFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Number of decoded frames held ahead of the consumer (at least 1).
    pub fn with_buffer(mut self, frames: usize) -> Self {
        self.buffer = frames.max(1);
        self
    }

    pub fn max_resolution(&self) -> Option<ImageSize> {
        self.max_resolution
    }

    pub fn failure_policy(&self) -> FrameFailurePolicy {
        self.failure_policy
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Validate inputs and plan the sampling of `path`.
    pub async fn prepare(&self, path: &Path, fps: Option<f64>) -> Result<SamplingPlan, ExtractionError> {
        sample_interval(fps)?;

        let info = self.source.probe(path).await?;
        let native = info.size();
        let frame_size = match self.max_resolution {
            Some(max) => native.fit_within(max),
            None => native,
        };

        let plan = SamplingPlan::new(info.duration, fps)?.with_frame_size(frame_size);
        info!(
            path = %path.display(),
            codec = %info.codec,
            native_fps = info.fps,
            duration = info.duration,
            frames = plan.frame_count(),
            interval = plan.interval(),
            frame_size = %frame_size,
            "Prepared frame extraction"
        );
        Ok(plan)
    }

    /// Stream frames of `path` sampled at `fps`.
    ///
    /// Validation errors arrive as the first stream item.
    pub fn extract_frames(&self, path: impl Into<PathBuf>, fps: Option<f64>) -> FrameStream {
        let this = self.clone();
        let path = path.into();

        CancellableStream::spawn(self.buffer, move |tx| async move {
            match this.prepare(&path, fps).await {
                Ok(plan) => this.produce(&path, plan, tx).await,
                Err(e) => tx.fail(e).await,
            }
        })
    }

    /// Stream frames of `path` following an existing plan.
    pub fn extract_planned(&self, path: impl Into<PathBuf>, plan: SamplingPlan) -> FrameStream {
        let this = self.clone();
        let path = path.into();

        CancellableStream::spawn(self.buffer, move |tx| async move {
            this.produce(&path, plan, tx).await
        })
    }

    async fn produce(
        &self,
        path: &Path,
        plan: SamplingPlan,
        tx: StreamSender<VideoFrame, ExtractionError>,
    ) {
        let size = plan.frame_size();
        if size.is_empty() {
            tx.fail(ExtractionError::AssetLoadingFailed(format!(
                "Video has no usable frame size ({})",
                size
            )))
            .await;
            return;
        }

        let mut delivered = 0u64;
        for k in 0..plan.frame_count() {
            if tx.is_cancelled() {
                debug!(delivered, "Frame extraction cancelled");
                tx.finish_cancelled();
                return;
            }

            let time = plan.timestamp(k);
            let decoded = tokio::select! {
                biased;
                _ = tx.signal().cancelled() => {
                    tx.finish_cancelled();
                    return;
                }
                decoded = self.source.frame_at(path, time, size) => decoded,
            };

            match decoded {
                Ok(image) => {
                    metrics::record_frame_extracted(self.source.name());
                    let frame = VideoFrame {
                        image,
                        metadata: FrameMetadata {
                            frame_index: k,
                            timestamp: time,
                            duration: plan.duration(),
                        },
                    };
                    if !tx.send(frame).await {
                        return;
                    }
                    delivered += 1;
                }
                Err(e @ ExtractionError::FrameGenerationFailed { .. })
                    if self.failure_policy == FrameFailurePolicy::Skip =>
                {
                    warn!(time, error = %e, "Skipping undecodable frame");
                }
                Err(e) => {
                    warn!(time, error = %e, "Frame extraction failed");
                    tx.fail(e).await;
                    return;
                }
            }
        }

        debug!(delivered, planned = plan.frame_count(), "Frame extraction finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use image::RgbImage;

    const EPS: f64 = 1e-9;

    /// Naive reference: step k until k * interval reaches the duration.
    fn stepped_count(duration: f64, fps: f64) -> u64 {
        let interval = 1.0 / fps;
        let mut k = 0u64;
        while (k as f64) * interval < duration {
            k += 1;
        }
        k
    }

    #[test]
    fn test_two_seconds_at_five_fps() {
        let plan = SamplingPlan::new(2.0, Some(5.0)).unwrap();
        assert_eq!(plan.frame_count(), 10);
        assert_eq!(estimate_frame_count(2.0, Some(5.0)), 10);

        let times: Vec<f64> = plan.timestamps().collect();
        assert_eq!(times.len(), 10);
        for (k, t) in times.iter().enumerate() {
            assert!((t - k as f64 * 0.2).abs() < EPS);
        }
        assert!((times[9] - 1.8).abs() < EPS);
    }

    #[test]
    fn test_estimate_matches_stepping() {
        let durations = [0.0, 0.1, 0.5, 1.0, 1.999, 2.0, 2.001, 3.3, 10.0, 59.94, 61.5];
        let rates = [0.5, 1.0, 2.0, 3.0, 5.0, 7.0, 10.0, 23.976, 29.97, 30.0, 60.0];
        for &duration in &durations {
            for &fps in &rates {
                assert_eq!(
                    estimate_frame_count(duration, Some(fps)),
                    stepped_count(duration, fps),
                    "duration={} fps={}",
                    duration,
                    fps
                );
            }
        }
    }

    #[test]
    fn test_default_interval_is_one_second() {
        let plan = SamplingPlan::new(3.5, None).unwrap();
        assert!((plan.interval() - 1.0).abs() < EPS);
        assert_eq!(plan.frame_count(), 4);
        assert_eq!(SamplingPlan::new(3.0, None).unwrap().frame_count(), 3);
    }

    #[test]
    fn test_invalid_rates_rejected() {
        for fps in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                SamplingPlan::new(1.0, Some(fps)),
                Err(ExtractionError::InvalidFrameRate(_))
            ));
            assert_eq!(estimate_frame_count(1.0, Some(fps)), 0);
        }
    }

    #[test]
    fn test_zero_duration_has_no_frames() {
        assert_eq!(SamplingPlan::new(0.0, Some(30.0)).unwrap().frame_count(), 0);
    }

    #[test]
    fn test_oversized_plans_rejected() {
        for (duration, fps) in [(f64::MAX, 1.0), (1.0, 1e300), (3600.0 * 24.0 * 365.0, 1000.0)] {
            assert!(matches!(
                SamplingPlan::new(duration, Some(fps)),
                Err(ExtractionError::AssetLoadingFailed(_))
            ));
            assert_eq!(estimate_frame_count(duration, Some(fps)), 0);
        }

        let plan = SamplingPlan::new(MAX_PLANNED_FRAMES as f64, None).unwrap();
        assert_eq!(plan.frame_count(), MAX_PLANNED_FRAMES);
    }

    struct StaticSource {
        duration: f64,
        size: ImageSize,
        bad_times: Vec<f64>,
    }

    #[async_trait]
    impl FrameSource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        async fn probe(&self, path: &Path) -> Result<MediaInfo, ExtractionError> {
            if path.as_os_str() == "missing.mp4" {
                return Err(ExtractionError::InvalidVideoUrl(path.to_path_buf()));
            }
            Ok(MediaInfo {
                duration: self.duration,
                width: self.size.width,
                height: self.size.height,
                fps: 30.0,
                codec: "raw".to_string(),
            })
        }

        async fn frame_at(
            &self,
            _: &Path,
            time: f64,
            size: ImageSize,
        ) -> Result<DynamicImage, ExtractionError> {
            if self.bad_times.iter().any(|t| (t - time).abs() < 1e-6) {
                return Err(ExtractionError::frame_generation_failed(time, "corrupt packet"));
            }
            Ok(DynamicImage::ImageRgb8(RgbImage::new(size.width, size.height)))
        }
    }

    fn extractor(duration: f64, bad_times: Vec<f64>) -> VideoFrameExtractor {
        VideoFrameExtractor::new(Arc::new(StaticSource {
            duration,
            size: ImageSize::new(1920, 1080),
            bad_times,
        }))
    }

    #[tokio::test]
    async fn test_extracts_planned_timestamps() {
        let mut stream = extractor(2.0, vec![]).extract_frames("clip.mp4", Some(5.0));
        let mut frames = Vec::new();
        while let Some(frame) = stream.next().await {
            frames.push(frame.unwrap());
        }

        assert_eq!(frames.len(), 10);
        for (k, frame) in frames.iter().enumerate() {
            assert_eq!(frame.metadata.frame_index, k as u64);
            assert!((frame.timestamp() - k as f64 * 0.2).abs() < EPS);
            assert!((frame.metadata.duration - 2.0).abs() < EPS);
        }
    }

    #[tokio::test]
    async fn test_max_resolution_downscales() {
        let extractor = extractor(1.0, vec![]).with_max_resolution(ImageSize::new(640, 640));
        let plan = extractor.prepare(Path::new("clip.mp4"), None).await.unwrap();
        assert_eq!(plan.frame_size(), ImageSize::new(640, 360));

        let mut stream = extractor.extract_planned("clip.mp4", plan);
        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!((frame.image.width(), frame.image.height()), (640, 360));
    }

    #[tokio::test]
    async fn test_validation_errors_are_first_item() {
        let mut stream = extractor(1.0, vec![]).extract_frames("missing.mp4", None);
        assert!(matches!(
            stream.next().await,
            Some(Err(ExtractionError::InvalidVideoUrl(_)))
        ));
        assert!(stream.next().await.is_none());

        let mut stream = extractor(1.0, vec![]).extract_frames("clip.mp4", Some(0.0));
        assert!(matches!(
            stream.next().await,
            Some(Err(ExtractionError::InvalidFrameRate(_)))
        ));
    }

    #[tokio::test]
    async fn test_bad_frame_aborts_by_default() {
        let mut stream = extractor(3.0, vec![1.0]).extract_frames("clip.mp4", None);
        assert!(stream.next().await.unwrap().is_ok());
        match stream.next().await {
            Some(Err(ExtractionError::FrameGenerationFailed { time, .. })) => {
                assert!((time - 1.0).abs() < EPS)
            }
            other => panic!("expected frame failure, got {:?}", other.map(|r| r.is_ok())),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bad_frame_skipped_with_policy() {
        let mut stream = extractor(3.0, vec![1.0])
            .with_failure_policy(FrameFailurePolicy::Skip)
            .extract_frames("clip.mp4", None);

        let mut indices = Vec::new();
        while let Some(frame) = stream.next().await {
            indices.push(frame.unwrap().metadata.frame_index);
        }
        assert_eq!(indices, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_cancel_after_frames() {
        let mut stream = extractor(10.0, vec![]).extract_frames("clip.mp4", Some(2.0));
        for _ in 0..3 {
            assert!(stream.next().await.unwrap().is_ok());
        }
        stream.cancel();
        assert!(matches!(stream.next().await, Some(Err(ExtractionError::Cancelled))));
        assert!(stream.next().await.is_none());
    }
}
