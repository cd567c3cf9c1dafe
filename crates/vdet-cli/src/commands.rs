//! Subcommand implementations.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};
use vdet_media::{
    check_ffmpeg, check_ffprobe, DetectionService, FrameFailurePolicy, ModelCache, ModelLoader,
    OnnxBackendFactory, VideoDetectionService, VideoFrameExtractor, DEFAULT_SCORE_FLOOR,
};
use vdet_models::{DetectionConfiguration, DetectionResult, VideoDetectionProgress};

use crate::config::DetectorConfig;

#[derive(Serialize)]
struct ImageRecord<'a> {
    path: &'a Path,
    #[serde(flatten)]
    result: &'a DetectionResult,
}

#[derive(Serialize)]
struct FrameRecord<'a> {
    percentage: f64,
    #[serde(flatten)]
    progress: &'a VideoDetectionProgress,
}

fn emit<T: Serialize>(record: &T) -> anyhow::Result<()> {
    let line = serde_json::to_string(record)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", line)?;
    Ok(())
}

/// Lowest class score the ONNX decoder keeps.
///
/// Candidates below the floor never reach NMS, even with a zero confidence
/// threshold.
fn score_floor(detection: &DetectionConfiguration) -> f32 {
    detection.confidence_threshold().max(DEFAULT_SCORE_FLOOR)
}

/// Load the configured model into a fresh service.
async fn build_service(config: &DetectorConfig) -> anyhow::Result<DetectionService> {
    let detection = config.detection_configuration();
    let factory = OnnxBackendFactory::new(detection.input_size())
        .with_score_floor(score_floor(&detection));
    let loader = ModelLoader::new(config.search_paths(), Arc::new(factory), ModelCache::new());

    DetectionService::load(&config.model, detection, &loader, config.compute_units)
        .await
        .with_context(|| format!("Failed to load model {}", config.model))
}

pub async fn detect_images(config: &DetectorConfig, paths: &[PathBuf]) -> anyhow::Result<()> {
    let service = build_service(config).await?;

    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        let image = image::open(path).with_context(|| format!("Failed to read image {}", path.display()))?;
        images.push(image);
    }

    let results = service
        .detect_batch(&images, |progress| debug!(progress, "Batch progress"))
        .await?;

    for (path, result) in paths.iter().zip(&results) {
        emit(&ImageRecord { path, result })?;
    }

    info!(
        images = results.len(),
        objects = results.iter().map(|r| r.count()).sum::<usize>(),
        "Image detection finished"
    );
    Ok(())
}

pub async fn detect_video(config: &DetectorConfig, path: PathBuf) -> anyhow::Result<()> {
    let ffmpeg = check_ffmpeg().context("Video detection needs ffmpeg on PATH")?;
    let ffprobe = check_ffprobe().context("Video detection needs ffprobe on PATH")?;
    debug!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "Found FFmpeg tools");

    let service = build_service(config).await?;

    let policy = if config.skip_bad_frames {
        FrameFailurePolicy::Skip
    } else {
        FrameFailurePolicy::Abort
    };
    let mut extractor = VideoFrameExtractor::default().with_failure_policy(policy);
    if let Some(max) = config.max_resolution {
        extractor = extractor.with_max_resolution(max);
    }

    let video = VideoDetectionService::new(service, extractor);
    let mut stream = video.detect(path, config.fps);

    // Ctrl-C cancels the stream; the next item is a cancellation error.
    let cancel = stream.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, cancelling");
            cancel.cancel();
        }
    });

    let mut frames = 0u64;
    let outcome = loop {
        match stream.next().await {
            None => break Ok(()),
            Some(Ok(progress)) => {
                let record = FrameRecord {
                    percentage: progress.percentage(),
                    progress: &progress,
                };
                if let Err(e) = emit(&record) {
                    break Err(e);
                }
                frames += 1;
            }
            Some(Err(e)) if e.is_cancelled() => {
                warn!(frames, "Video detection cancelled");
                break Err(anyhow::anyhow!("Interrupted after {} frames", frames));
            }
            Some(Err(e)) => break Err(e).context("Video detection failed"),
        }
    };

    interrupt.abort();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdet_models::ImageSize;

    fn detection(confidence: f32) -> DetectionConfiguration {
        DetectionConfiguration::new(confidence, 0.45, 100, ImageSize::square(640))
    }

    #[test]
    fn test_score_floor_never_below_default() {
        assert_eq!(score_floor(&detection(0.0)), DEFAULT_SCORE_FLOOR);
        assert_eq!(score_floor(&detection(0.001)), DEFAULT_SCORE_FLOOR);
    }

    #[test]
    fn test_score_floor_follows_confidence() {
        assert!((score_floor(&detection(0.6)) - 0.6).abs() < 1e-6);
    }
}
