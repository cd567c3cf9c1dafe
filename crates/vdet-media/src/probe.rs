//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use vdet_models::ImageSize;

use crate::command::check_ffprobe;
use crate::error::ExtractionError;

/// Frame rate assumed when the stream does not report one.
const DEFAULT_FPS: f64 = 30.0;

/// Video file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Native frame rate (fps)
    pub fps: f64,
    /// Video codec
    pub codec: String,
}

impl MediaInfo {
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }

    /// Seconds between two native frames.
    pub fn frame_interval(&self) -> f64 {
        if self.fps.is_finite() && self.fps > 0.0 {
            1.0 / self.fps
        } else {
            1.0 / DEFAULT_FPS
        }
    }

    /// True when `time` lies within one native frame of the end of the video.
    pub fn is_near_end(&self, time: f64) -> bool {
        let interval = self.frame_interval();
        time + interval >= self.duration && time <= self.duration + interval
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Probe a video file for information.
pub async fn probe_media(path: impl AsRef<Path>) -> Result<MediaInfo, ExtractionError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ExtractionError::InvalidVideoUrl(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ExtractionError::AssetLoadingFailed(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(ExtractionError::AssetLoadingFailed(format!(
            "FFprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_output(&output.stdout)
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(json: &[u8]) -> Result<MediaInfo, ExtractionError> {
    let probe: FfprobeOutput = serde_json::from_slice(json)
        .map_err(|e| ExtractionError::AssetLoadingFailed(format!("Invalid ffprobe output: {}", e)))?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| ExtractionError::AssetLoadingFailed("No video stream found".to_string()))?;

    // The container duration also covers audio, which often runs past the
    // last video frame.
    let duration = video_stream
        .duration
        .as_deref()
        .or(probe.format.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| ExtractionError::AssetLoadingFailed("Unknown media duration".to_string()))?;

    let fps = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(DEFAULT_FPS);

    Ok(MediaInfo {
        duration,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        fps,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|fps: &f64| *fps > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "format": { "duration": "12.480000" },
            "streams": [
                { "codec_type": "audio", "codec_name": "aac" },
                { "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
                  "r_frame_rate": "30/1", "avg_frame_rate": "0/0" }
            ]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert!((info.duration - 12.48).abs() < 1e-9);
        assert_eq!(info.size(), ImageSize::new(1920, 1080));
        assert!((info.fps - 30.0).abs() < 1e-9);
        assert_eq!(info.codec, "h264");
    }

    #[test]
    fn test_stream_duration_fallback() {
        let json = br#"{
            "format": {},
            "streams": [{ "codec_type": "video", "width": 4, "height": 2, "duration": "2.0" }]
        }"#;
        assert!((parse_probe_output(json).unwrap().duration - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_video_stream_duration_preferred() {
        let json = br#"{
            "format": { "duration": "10.050000" },
            "streams": [
                { "codec_type": "video", "width": 640, "height": 360, "duration": "10.000000",
                  "avg_frame_rate": "30/1" },
                { "codec_type": "audio", "duration": "10.050000" }
            ]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert!((info.duration - 10.0).abs() < 1e-9);

        // One sample per second stays on frames the video stream actually has.
        let plan = crate::extractor::SamplingPlan::new(info.duration, Some(1.0)).unwrap();
        assert_eq!(plan.frame_count(), 10);
        assert!(plan.timestamp(plan.frame_count() - 1) < info.duration - info.frame_interval());
    }

    #[test]
    fn test_near_end_window() {
        let info = MediaInfo {
            duration: 10.0,
            width: 640,
            height: 360,
            fps: 30.0,
            codec: "h264".to_string(),
        };
        assert!((info.frame_interval() - 1.0 / 30.0).abs() < 1e-12);
        assert!(info.is_near_end(9.98));
        assert!(info.is_near_end(10.02));
        assert!(!info.is_near_end(9.5));
        assert!(!info.is_near_end(10.5));

        let unknown_rate = MediaInfo { fps: 0.0, ..info };
        assert!((unknown_rate.frame_interval() - 1.0 / DEFAULT_FPS).abs() < 1e-12);
    }

    #[test]
    fn test_no_video_stream() {
        let json = br#"{ "format": { "duration": "1.0" }, "streams": [] }"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(ExtractionError::AssetLoadingFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = probe_media("/nonexistent/video.mp4").await.unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidVideoUrl(_)));
    }
}
